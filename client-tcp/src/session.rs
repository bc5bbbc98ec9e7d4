use std::time::Instant;

use shared::{Error, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::sleep_until;
use tracing::debug;

use crate::connection::Connection;

/// Read buffer headroom reserved before every socket read.
const READ_CHUNK: usize = 64 * 1024;

/// A [`Connection`] bound to a live TCP stream. Feeds it readable and timer events and writes
/// out whatever it encodes.
pub struct Session {
    conn: Connection,
    stream: TcpStream,
}

impl Session {
    pub async fn connect(mut conn: Connection, nodelay: bool) -> Result<Self> {
        let addr = conn.addr().to_string();
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|source| Error::Connect {
                addr: addr.clone(),
                source,
            })?;

        if nodelay {
            stream
                .set_nodelay(true)
                .map_err(|source| Error::Transport { addr, source })?;
        }

        conn.on_connected();
        Ok(Self { conn, stream })
    }

    /// Populates the keyspace and returns once every record is acknowledged.
    pub async fn load(&mut self) -> Result<()> {
        self.conn.start_loading()?;
        self.drive(None, |conn, _| conn.is_loaded()).await?;
        debug!(conn = self.conn.id(), addr = %self.conn.addr(), "load phase done");
        Ok(())
    }

    /// Runs the measured phase until the connection's exit condition holds.
    pub async fn run(&mut self) -> Result<()> {
        let now = self.conn.now();
        self.conn.start(now);
        self.conn.drive_write_machine(now)?;

        let deadline = self.conn.run_deadline();
        self.drive(Some(deadline), |conn, now| conn.check_exit_condition(now))
            .await?;

        let now = self.conn.now();
        self.conn.finish(now);
        Ok(())
    }

    /// Event loop: flush, check `done`, then wait for input, the connection's timer, or
    /// `wake_at`, whichever comes first.
    async fn drive<F>(&mut self, wake_at: Option<Instant>, done: F) -> Result<()>
    where
        F: Fn(&Connection, Instant) -> bool,
    {
        loop {
            self.flush().await?;

            let now = self.conn.now();
            if done(&self.conn, now) {
                return Ok(());
            }

            let timer = self.conn.timer_deadline();
            let Session { conn, stream } = self;
            let input = conn.input_mut();
            input.reserve(READ_CHUNK);

            tokio::select! {
                read = stream.read_buf(input) => match read {
                    Ok(0) => return Err(Error::UnexpectedEof(conn.addr().to_string())),
                    Ok(_) => conn.read_callback()?,
                    Err(source) => {
                        return Err(Error::Transport {
                            addr: conn.addr().to_string(),
                            source,
                        });
                    }
                },
                _ = sleep_until(timer.unwrap_or(now).into()), if timer.is_some() => {
                    conn.timer_callback()?;
                }
                _ = sleep_until(wake_at.unwrap_or(now).into()), if wake_at.is_some() => {}
            }
        }
    }

    async fn flush(&mut self) -> Result<()> {
        if !self.conn.has_output() {
            return Ok(());
        }
        let out = self.conn.take_output();
        self.stream
            .write_all(&out)
            .await
            .map_err(|source| Error::Transport {
                addr: self.conn.addr().to_string(),
                source,
            })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    pub fn into_connection(self) -> Connection {
        self.conn
    }
}
