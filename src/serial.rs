//! Native serial port support for [`Bridge`](crate::Bridge).
//!
//! Uses the [`serial2-tokio`](https://crates.io/crates/serial2-tokio) crate.
//! Reading and writing happens in background tasks, so the returned [`Port`]
//! never blocks as long as [`ReadReady`] is checked before reading, which
//! [`Bridge::poll`](crate::Bridge::poll) always does.
//!
//! [`open`] must be called from within a Tokio runtime, while the bridge
//! itself should run on a blocking thread (e.g. [`tokio::task::spawn_blocking`]).

extern crate std;

use crate::Error;
use embedded_hal::digital::{self, OutputPin};
use embedded_io::{ErrorType, Read, ReadReady, Write};
use log::{debug, error};
use serial2_tokio::{CharSize, Parity, SerialPort, Settings, StopBits};
use std::{collections::VecDeque, io, sync::Arc, vec::Vec};
use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender, error::TryRecvError},
    task,
};

// Buffer size for serial port reads
const BUF_SIZE: usize = 64;

/// Port-specific error type to be used as `E` for the generic [`Error<E>`] type.
pub type PortError = io::Error;

/// Serial port implementing [`Read`], [`ReadReady`] and [`Write`].
pub struct Port {
    serial: Arc<SerialPort>,
    rx: UnboundedReceiver<io::Result<Vec<u8>>>,
    tx: UnboundedSender<Vec<u8>>,
    buf: VecDeque<u8>,
    closed: bool,
}

/// Opens a native serial port at the given path with 9600 baud, 8N1.
///
/// Returns a [`Port`] that can be passed to [`Bridge::new`](crate::Bridge::new).
pub fn open(path: &str) -> Result<Port, Error<PortError>> {
    let serial = SerialPort::open(path, |mut settings: Settings| {
        settings.set_raw();
        settings.set_baud_rate(9600)?;
        settings.set_char_size(CharSize::Bits8);
        settings.set_stop_bits(StopBits::One);
        settings.set_parity(Parity::None);

        Ok(settings)
    })?;

    serial.discard_buffers()?;

    let serial = Arc::new(serial);
    let (rx_tx, rx) = mpsc::unbounded_channel();
    let (tx, tx_rx) = mpsc::unbounded_channel();

    task::spawn(read_task(Arc::clone(&serial), rx_tx));
    task::spawn(write_task(Arc::clone(&serial), tx_rx));

    debug!("Opened serial port {path}");

    Ok(Port {
        serial,
        rx,
        tx,
        buf: VecDeque::new(),
        closed: false,
    })
}

async fn read_task(serial: Arc<SerialPort>, tx: UnboundedSender<io::Result<Vec<u8>>>) {
    let mut buf = [0x00; BUF_SIZE];

    loop {
        let res = match serial.read(&mut buf).await {
            Ok(0) => Err(io::ErrorKind::UnexpectedEof.into()),
            res => res,
        };
        let stop = res.is_err();

        if tx.send(res.map(|len| buf[..len].to_vec())).is_err() || stop {
            break;
        }
    }
}

async fn write_task(serial: Arc<SerialPort>, mut rx: UnboundedReceiver<Vec<u8>>) {
    while let Some(data) = rx.recv().await {
        if let Err(err) = serial.write_all(&data).await {
            error!("Error writing to serial port: {err}");
            break;
        }
    }
}

impl Port {
    /// Returns the DTR line of this port for use as wake-up line.
    #[must_use]
    pub fn wake_line(&self) -> WakeLine {
        WakeLine(Arc::clone(&self.serial))
    }

    fn accept(&mut self, res: Option<io::Result<Vec<u8>>>) -> Result<(), io::Error> {
        match res {
            Some(Ok(data)) => {
                self.buf.extend(data);

                Ok(())
            }
            Some(Err(err)) => {
                self.closed = true;

                Err(err)
            }
            None => {
                self.closed = true;

                Err(io::ErrorKind::BrokenPipe.into())
            }
        }
    }
}

impl ErrorType for Port {
    type Error = io::Error;
}

impl ReadReady for Port {
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        loop {
            match self.rx.try_recv() {
                Ok(data) => self.accept(Some(data))?,
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) if self.buf.is_empty() => self.accept(None)?,
                Err(TryRecvError::Disconnected) => break,
            }
        }

        Ok(!self.buf.is_empty())
    }
}

impl Read for Port {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        // Block until data is available
        if self.buf.is_empty() && !self.closed {
            let res = self.rx.blocking_recv();

            self.accept(res)?;
        }

        let len = buf.len().min(self.buf.len());

        for (dst, src) in buf.iter_mut().zip(self.buf.drain(..len)) {
            *dst = src;
        }

        Ok(len)
    }
}

impl Write for Port {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::from(io::ErrorKind::BrokenPipe))?;

        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        if self.tx.is_closed() {
            return Err(io::ErrorKind::BrokenPipe.into());
        }

        Ok(())
    }
}

/// DTR line of a serial port, used to drive the wake-up line of the control box.
///
/// [`OutputPin::set_high`] asserts DTR. Most USB-UART adapters drive an asserted
/// DTR output low, so the line usually needs an inverting stage.
pub struct WakeLine(Arc<SerialPort>);

/// Error raised when the DTR line cannot be changed.
#[derive(Debug)]
pub struct WakeLineError(io::Error);

impl WakeLineError {
    /// Returns the underlying I/O error.
    #[must_use]
    pub fn into_inner(self) -> io::Error {
        self.0
    }
}

impl digital::Error for WakeLineError {
    fn kind(&self) -> digital::ErrorKind {
        digital::ErrorKind::Other
    }
}

impl digital::ErrorType for WakeLine {
    type Error = WakeLineError;
}

impl OutputPin for WakeLine {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.0.set_dtr(false).map_err(|err| {
            error!("Error clearing DTR: {err}");
            WakeLineError(err)
        })
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.0.set_dtr(true).map_err(|err| {
            error!("Error setting DTR: {err}");
            WakeLineError(err)
        })
    }
}
