//! Actuation link to the station microcontroller.
//!
//! The controller speaks a line protocol: each command is written as
//! `command\r\n` and acknowledged by echoing the same word back within
//! [`ECHO_TIMEOUT`]. Any other answer, or none, is an error.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::Path;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::ActuatorError;

/// Controller states the station can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Start,
    Ready,
    Scanning,
    ScanningAfter,
    Processing,
    Ok,
    Nok,
    Error,
}

impl Command {
    /// Every command, in controller state order.
    pub const ALL: [Self; 8] = [
        Self::Start,
        Self::Ready,
        Self::Scanning,
        Self::ScanningAfter,
        Self::Processing,
        Self::Ok,
        Self::Nok,
        Self::Error,
    ];

    /// The word sent on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Ready => "ready",
            Self::Scanning => "scanning",
            Self::ScanningAfter => "scanning_after",
            Self::Processing => "processing",
            Self::Ok => "ok",
            Self::Nok => "nok",
            Self::Error => "error",
        }
    }

    /// The pass/fail command for a verdict.
    #[must_use]
    pub const fn for_verdict(passed: bool) -> Self {
        if passed { Self::Ok } else { Self::Nok }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anything that can signal station state to the operator hardware.
pub trait Actuator: Send {
    /// Send one command and wait for its acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns [`ActuatorError`] if the command could not be delivered or
    /// was not acknowledged.
    fn send(&mut self, command: Command) -> Result<(), ActuatorError>;
}

/// How long the controller gets to echo a command.
pub const ECHO_TIMEOUT: Duration = Duration::from_secs(1);

/// Line-protocol actuator over any byte transport.
///
/// Incoming lines are read on a dedicated thread so every exchange has a
/// deadline, and anything the controller sent unprompted is discarded
/// before the next command goes out.
pub struct LineActuator<W> {
    writer: W,
    lines: mpsc::Receiver<io::Result<String>>,
    timeout: Duration,
}

impl<W: Write + Send> LineActuator<W> {
    /// Talk to a controller that answers on `reader` and listens on
    /// `writer`.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the reader thread cannot be spawned.
    pub fn new<R: Read + Send + 'static>(reader: R, writer: W) -> io::Result<Self> {
        let (tx, lines) = mpsc::channel();
        std::thread::Builder::new()
            .name("actuator-rx".to_owned())
            .spawn(move || {
                for line in BufReader::new(reader).lines() {
                    let failed = line.is_err();
                    if tx.send(line).is_err() || failed {
                        break;
                    }
                }
                debug!("actuation link closed");
            })?;
        Ok(Self {
            writer,
            lines,
            timeout: ECHO_TIMEOUT,
        })
    }

    /// Wait at most `timeout` for each echo.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The writing half of the transport.
    pub fn into_writer(self) -> W {
        self.writer
    }

    fn discard_pending(&self) {
        for line in self.lines.try_iter() {
            match line {
                Ok(line) => warn!(line = line.trim(), "discarding unsolicited controller output"),
                Err(e) => warn!(error = %e, "discarding failed controller read"),
            }
        }
    }
}

impl LineActuator<File> {
    /// Open a serial device node that is already configured for the
    /// controller's baud rate.
    ///
    /// # Errors
    ///
    /// Returns [`ActuatorError::Io`] if the device cannot be opened.
    pub fn open(path: &Path) -> Result<Self, ActuatorError> {
        let device = OpenOptions::new().read(true).write(true).open(path)?;
        let reader = device.try_clone()?;
        info!(device = %path.display(), "opened actuation link");
        Ok(Self::new(reader, device)?)
    }
}

impl<W: Write + Send> Actuator for LineActuator<W> {
    fn send(&mut self, command: Command) -> Result<(), ActuatorError> {
        self.discard_pending();

        debug!(%command, "sending command");
        self.writer.write_all(command.as_str().as_bytes())?;
        self.writer.write_all(b"\r\n")?;
        self.writer.flush()?;

        let answer = match self.lines.recv_timeout(self.timeout) {
            Ok(line) => line?,
            Err(RecvTimeoutError::Timeout) => {
                return Err(ActuatorError::Timeout {
                    sent: command.as_str().to_owned(),
                    seconds: self.timeout.as_secs_f64(),
                });
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "controller closed the link",
                )
                .into());
            }
        };

        let answer = answer.trim();
        if answer != command.as_str() {
            return Err(ActuatorError::Mismatch {
                sent: command.as_str().to_owned(),
                received: answer.to_owned(),
            });
        }
        Ok(())
    }
}

/// Actuator for stations without hardware: logs every command.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogActuator;

impl Actuator for LogActuator {
    fn send(&mut self, command: Command) -> Result<(), ActuatorError> {
        info!(%command, "actuation (no hardware attached)");
        Ok(())
    }
}

#[cfg(all(test, unix))]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::os::unix::net::UnixStream;
    use std::thread::JoinHandle;
    use std::time::Instant;

    use super::*;

    fn link() -> (LineActuator<UnixStream>, UnixStream) {
        let (ours, controller) = UnixStream::pair().unwrap();
        let actuator = LineActuator::new(ours.try_clone().unwrap(), ours)
            .unwrap()
            .with_timeout(Duration::from_millis(200));
        (actuator, controller)
    }

    /// Controller that answers every line it receives with `reply(line)`.
    fn answer_with(controller: UnixStream, reply: fn(&str) -> String) -> JoinHandle<()> {
        std::thread::spawn(move || {
            let mut out = controller.try_clone().unwrap();
            for line in BufReader::new(controller).lines() {
                let Ok(line) = line else { break };
                if out.write_all(reply(line.trim()).as_bytes()).is_err() {
                    break;
                }
            }
        })
    }

    fn echo(line: &str) -> String {
        format!("{line}\r\n")
    }

    #[test]
    fn wire_words() {
        let words: Vec<&str> = Command::ALL.iter().map(|c| c.as_str()).collect();
        assert_eq!(
            words,
            ["start", "ready", "scanning", "scanning_after", "processing", "ok", "nok", "error"]
        );
        assert_eq!(Command::for_verdict(true), Command::Ok);
        assert_eq!(Command::for_verdict(false), Command::Nok);
    }

    #[test]
    fn echoed_commands_are_accepted() {
        let (mut actuator, controller) = link();
        answer_with(controller, echo);

        actuator.send(Command::Ready).unwrap();
        actuator.send(Command::Processing).unwrap();
        actuator.send(Command::Ok).unwrap();
    }

    #[test]
    fn mismatched_echo_is_an_error() {
        let (mut actuator, controller) = link();
        answer_with(controller, |_| "Unknown command\n".to_owned());

        let err = actuator.send(Command::Ok).unwrap_err();
        assert!(matches!(
            err,
            ActuatorError::Mismatch { ref sent, ref received } if sent == "ok" && received == "Unknown command"
        ));
    }

    #[test]
    fn silent_controller_times_out() {
        let (mut actuator, _controller) = link();

        let started = Instant::now();
        let err = actuator.send(Command::Nok).unwrap_err();
        assert!(matches!(err, ActuatorError::Timeout { ref sent, .. } if sent == "nok"));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn stale_input_is_discarded_before_sending() {
        let (mut actuator, mut controller) = link();
        controller.write_all(b"READY\r\nok\r\n").unwrap();
        // Let the reader thread queue the unsolicited lines.
        std::thread::sleep(Duration::from_millis(100));
        answer_with(controller, echo);

        actuator.send(Command::Ok).unwrap();
        actuator.send(Command::Nok).unwrap();
    }

    #[test]
    fn late_echo_does_not_shift_later_exchanges() {
        let (mut actuator, controller) = link();
        answer_with(controller, |line| {
            if line == "processing" {
                std::thread::sleep(Duration::from_millis(400));
            }
            echo(line)
        });

        assert!(matches!(
            actuator.send(Command::Processing),
            Err(ActuatorError::Timeout { .. })
        ));
        std::thread::sleep(Duration::from_millis(400));
        actuator.send(Command::Ok).unwrap();
    }

    #[test]
    fn closed_link_is_an_io_error() {
        let (mut actuator, controller) = link();
        drop(controller);

        assert!(matches!(
            actuator.send(Command::Ready),
            Err(ActuatorError::Io(_))
        ));
    }
}
