use anyhow::{anyhow, bail, Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;

/// Opens the tty read/write in raw mode at `baud_rate`. Reads block until at
/// least one byte arrives.
pub fn open_device(path: &Path, baud_rate: u32) -> Result<File> {
    let speed = baud_constant(baud_rate)?;
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NOCTTY)
        .open(path)
        .with_context(|| format!("open serial device {}", path.display()))?;
    configure_raw(&file, speed).with_context(|| format!("configure {}", path.display()))?;
    Ok(file)
}

fn configure_raw(file: &File, speed: libc::speed_t) -> Result<()> {
    let fd = file.as_raw_fd();
    let mut tio: libc::termios = unsafe { std::mem::zeroed() };
    if unsafe { libc::tcgetattr(fd, &mut tio) } != 0 {
        return Err(anyhow!("tcgetattr failed: {}", std::io::Error::last_os_error()));
    }

    unsafe {
        libc::cfmakeraw(&mut tio);
        libc::cfsetispeed(&mut tio, speed);
        libc::cfsetospeed(&mut tio, speed);
    }
    tio.c_cflag |= libc::CLOCAL | libc::CREAD;
    tio.c_cc[libc::VMIN] = 1;
    tio.c_cc[libc::VTIME] = 0;

    if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &tio) } != 0 {
        return Err(anyhow!("tcsetattr failed: {}", std::io::Error::last_os_error()));
    }
    // Drop whatever the device queued before we were listening.
    unsafe {
        libc::tcflush(fd, libc::TCIFLUSH);
    }
    Ok(())
}

fn baud_constant(baud_rate: u32) -> Result<libc::speed_t> {
    let speed = match baud_rate {
        9600 => libc::B9600,
        19200 => libc::B19200,
        38400 => libc::B38400,
        57600 => libc::B57600,
        115200 => libc::B115200,
        230400 => libc::B230400,
        other => bail!("unsupported baud rate {other}"),
    };
    Ok(speed)
}

/// How many times the start command is written at startup.
pub const START_COMMAND_WRITES: usize = 2;

/// Asks the sensor to start streaming readings, writing the command
/// [`START_COMMAND_WRITES`] times.
pub fn send_start_command<W: Write>(device: &mut W, command: &str) -> Result<()> {
    let framed = format!("{command}\r\n");
    for _ in 0..START_COMMAND_WRITES {
        device
            .write_all(framed.as_bytes())
            .context("write start command")?;
    }
    device.flush().context("flush start command")?;
    Ok(())
}

/// Line reader over the device stream. Any read error, and end of stream,
/// is an error: the device went away.
pub struct LineReader<R> {
    inner: R,
    buf: Vec<u8>,
}

impl<R: BufRead> LineReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(128),
        }
    }

    pub fn next_line(&mut self) -> Result<String> {
        self.buf.clear();
        let n = self
            .inner
            .read_until(b'\n', &mut self.buf)
            .context("read from serial device")?;
        if n == 0 {
            bail!("serial device closed (end of stream)");
        }
        let line = String::from_utf8_lossy(&self.buf);
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn maps_supported_baud_rates() {
        assert_eq!(baud_constant(115_200).unwrap(), libc::B115200);
        assert_eq!(baud_constant(9600).unwrap(), libc::B9600);
        assert!(baud_constant(12_345).is_err());
    }

    #[test]
    fn start_command_is_crlf_terminated_and_sent_twice() {
        let mut out = Vec::new();
        send_start_command(&mut out, "STA").unwrap();
        assert_eq!(out, b"STA\r\nSTA\r\n");
    }

    #[test]
    fn reads_crlf_lines_then_fails_at_end_of_stream() {
        let mut reader = LineReader::new(Cursor::new(
            b"OK STA\r\nCO2=512,HUM=48.30,TMP=22.10\r\npartial".to_vec(),
        ));
        assert_eq!(reader.next_line().unwrap(), "OK STA");
        assert_eq!(reader.next_line().unwrap(), "CO2=512,HUM=48.30,TMP=22.10");
        assert_eq!(reader.next_line().unwrap(), "partial");
        let err = reader.next_line().unwrap_err();
        assert!(err.to_string().contains("closed"));
    }

    #[test]
    fn invalid_utf8_is_replaced_not_fatal() {
        let mut reader = LineReader::new(Cursor::new(b"\xffCO2=1\n".to_vec()));
        let line = reader.next_line().unwrap();
        assert!(line.ends_with("CO2=1"));
    }

    #[test]
    fn opening_a_missing_device_fails() {
        let err = open_device(Path::new("/nonexistent/ttyACM9"), 115_200).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/ttyACM9"));
    }
}
