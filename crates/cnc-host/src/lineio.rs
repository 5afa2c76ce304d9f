//! Line input devices and asynchronous signals.
//!
//! Physical byte I/O is external; this module implements the contracted
//! surface: a non-blocking `gets` over the active line source, control
//! characters trapped beneath it and surfaced as atomic flags, and the
//! switch between the default (interactive) source and a program-memory
//! source. Line terminators CR, LF, `;` and NUL are equivalent.

use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, TryRecvError};
use motion::{Status, AXES};
use tracing::debug;

/// Signal flags written by the reader thread (the ISR stand-in) and polled
/// by the scheduler. Each is a single bit, set by the producer and cleared
/// by the consumer.
#[derive(Debug, Default)]
pub struct Signals {
    kill: AtomicBool,
    pause: AtomicBool,
    resume: AtomicBool,
}

impl Signals {
    pub fn raise_kill(&self) {
        self.kill.store(true, Ordering::Release);
    }

    pub fn raise_pause(&self) {
        self.pause.store(true, Ordering::Release);
    }

    pub fn raise_resume(&self) {
        self.resume.store(true, Ordering::Release);
    }

    pub fn take_kill(&self) -> bool {
        self.kill.swap(false, Ordering::AcqRel)
    }

    pub fn take_pause(&self) -> bool {
        self.pause.swap(false, Ordering::AcqRel)
    }

    pub fn take_resume(&self) -> bool {
        self.resume.swap(false, Ordering::AcqRel)
    }
}

/// Debounced limit switch state, one flag per axis. The electrical handling
/// is external; only the `thrown` signal is consumed here.
#[derive(Debug, Default)]
pub struct Limits {
    thrown: [AtomicBool; AXES],
}

impl Limits {
    pub fn throw(&self, axis: usize) {
        self.thrown[axis].store(true, Ordering::Release);
    }

    pub fn clear(&self, axis: usize) {
        self.thrown[axis].store(false, Ordering::Release);
    }

    pub fn clear_all(&self) {
        for flag in &self.thrown {
            flag.store(false, Ordering::Release);
        }
    }

    pub fn is_thrown(&self, axis: usize) -> bool {
        self.thrown[axis].load(Ordering::Acquire)
    }

    pub fn any_thrown(&self) -> bool {
        (0..AXES).any(|i| self.is_thrown(i))
    }
}

/// Non-blocking source fed by the stdin reader thread.
pub struct ChannelSource {
    rx: Receiver<String>,
    eof: bool,
}

impl ChannelSource {
    pub fn new(rx: Receiver<String>) -> Self {
        ChannelSource { rx, eof: false }
    }

    pub fn gets(&mut self, out: &mut String) -> Status {
        if self.eof {
            return Status::Eof;
        }
        match self.rx.try_recv() {
            Ok(line) => {
                *out = line;
                Status::Ok
            }
            Err(TryRecvError::Empty) => Status::Again,
            Err(TryRecvError::Disconnected) => {
                self.eof = true;
                Status::Eof
            }
        }
    }
}

/// Read-only program-memory source (canned programs, batch files).
pub struct ProgramSource {
    lines: Vec<String>,
    pos: usize,
}

impl ProgramSource {
    pub fn from_text(text: &str) -> Self {
        let lines = text
            .split(['\n', '\r', ';', '\0'])
            .map(str::trim)
            // Bare % lines are program delimiters, not blocks.
            .filter(|l| !l.is_empty() && *l != "%")
            .map(String::from)
            .collect();
        ProgramSource { lines, pos: 0 }
    }

    pub fn gets(&mut self, out: &mut String) -> Status {
        match self.lines.get(self.pos) {
            Some(line) => {
                out.clone_from(line);
                self.pos += 1;
                Status::Ok
            }
            None => Status::Eof,
        }
    }
}

/// The device set: a default source plus an optional program-memory source
/// layered over it.
pub struct DeviceSet {
    channel: Option<ChannelSource>,
    program: Option<ProgramSource>,
    prompt_capable: bool,
    /// A prompt has been written and no line consumed since.
    pub prompted: bool,
}

impl DeviceSet {
    /// Interactive device fed by a reader thread; prompt-capable.
    pub fn interactive(rx: Receiver<String>) -> Self {
        DeviceSet {
            channel: Some(ChannelSource::new(rx)),
            program: None,
            prompt_capable: true,
            prompted: false,
        }
    }

    /// No default device; only program sources (batch processing).
    pub fn headless() -> Self {
        DeviceSet {
            channel: None,
            program: None,
            prompt_capable: false,
            prompted: false,
        }
    }

    /// Switch input to a program-memory source.
    pub fn use_program(&mut self, text: &str) {
        debug!("input source: program memory");
        self.program = Some(ProgramSource::from_text(text));
    }

    /// Drop any program source and return to the default device.
    pub fn reset_to_default(&mut self) {
        self.program = None;
    }

    pub fn reading_program(&self) -> bool {
        self.program.is_some()
    }

    pub fn set_prompt_capable(&mut self, capable: bool) {
        self.prompt_capable = capable;
    }

    /// No prompt while reading from program memory.
    pub fn prompt_capable(&self) -> bool {
        self.prompt_capable && self.program.is_none()
    }

    /// Fetch the next line from the active source. A program source that
    /// runs dry silently reverts to the default device; `Eof` only ever
    /// comes from the default device itself.
    pub fn gets(&mut self, out: &mut String) -> Status {
        if let Some(program) = &mut self.program {
            match program.gets(out) {
                Status::Eof => {
                    self.program = None;
                    return Status::Again;
                }
                status => return status,
            }
        }
        match &mut self.channel {
            Some(channel) => channel.gets(out),
            None => Status::Eof,
        }
    }
}

/// Spawn the stdin reader thread. Control characters are trapped here and
/// surfaced through `signals`; completed lines are handed to the channel.
pub fn spawn_stdin_reader(signals: Arc<Signals>) -> Receiver<String> {
    let (tx, rx) = crossbeam_channel::bounded(8);
    std::thread::Builder::new()
        .name("line-reader".into())
        .spawn(move || {
            let mut stdin = std::io::stdin().lock();
            let mut buf: Vec<u8> = Vec::with_capacity(128);
            let mut byte = [0u8; 1];
            loop {
                match stdin.read(&mut byte) {
                    Ok(0) => {
                        if !buf.is_empty() {
                            let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
                        }
                        break;
                    }
                    Ok(_) => match byte[0] {
                        0x03 => signals.raise_kill(),   // ^C
                        0x13 => signals.raise_pause(),  // ^S
                        0x11 => signals.raise_resume(), // ^Q
                        b'\r' | b'\n' | b';' | 0 => {
                            if !buf.is_empty() {
                                let line = String::from_utf8_lossy(&buf).into_owned();
                                buf.clear();
                                if tx.send(line).is_err() {
                                    break;
                                }
                            }
                        }
                        b => buf.push(b),
                    },
                    Err(_) => break,
                }
            }
        })
        .expect("spawn line reader thread");
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn program_source_splits_on_all_terminators() {
        let mut src = ProgramSource::from_text("%\nG0 X1;G1 Y2\rG4 P1\n%\n");
        let mut line = String::new();
        assert_eq!(src.gets(&mut line), Status::Ok);
        assert_eq!(line, "G0 X1");
        assert_eq!(src.gets(&mut line), Status::Ok);
        assert_eq!(line, "G1 Y2");
        assert_eq!(src.gets(&mut line), Status::Ok);
        assert_eq!(line, "G4 P1");
        assert_eq!(src.gets(&mut line), Status::Eof);
    }

    #[test]
    fn channel_source_reports_backpressure_and_eof() {
        let (tx, rx) = crossbeam_channel::bounded(2);
        let mut src = ChannelSource::new(rx);
        let mut line = String::new();
        assert_eq!(src.gets(&mut line), Status::Again);
        tx.send("G0 X1".to_string()).unwrap();
        assert_eq!(src.gets(&mut line), Status::Ok);
        drop(tx);
        assert_eq!(src.gets(&mut line), Status::Eof);
        assert_eq!(src.gets(&mut line), Status::Eof);
    }

    #[test]
    fn program_source_preempts_default_device() {
        let (tx, rx) = crossbeam_channel::bounded(2);
        tx.send("from-channel".to_string()).unwrap();
        let mut dev = DeviceSet::interactive(rx);
        dev.use_program("from-program");
        assert!(!dev.prompt_capable());

        let mut line = String::new();
        assert_eq!(dev.gets(&mut line), Status::Ok);
        assert_eq!(line, "from-program");
        // Program exhausted: silent fall-back to the default device.
        assert_eq!(dev.gets(&mut line), Status::Again);
        assert!(dev.prompt_capable());
        assert_eq!(dev.gets(&mut line), Status::Ok);
        assert_eq!(line, "from-channel");
    }

    #[test]
    fn signals_clear_on_take() {
        let s = Signals::default();
        s.raise_kill();
        assert!(s.take_kill());
        assert!(!s.take_kill());
    }
}
