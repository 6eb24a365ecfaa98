use std::time::Duration;

use bytes::BytesMut;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, BufWriter},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    time::timeout,
};
use tracing::{debug, trace};
use zprobe_error::{ConnectionError, ProbeResult, ResultExt};

use super::{
    frame::{decode, encode_command, RespFrame},
    RedisOptions,
};

/// Предел буфера чтения, после которого соединение считается испорченным.
const MAX_READ_BUFFER: usize = 16 * 1024 * 1024;

/// Одно TCP соединение с Redis, обменивающееся кадрами RESP2.
pub struct RespConnection {
    /// Адрес сервера
    addr: String,
    reader: OwnedReadHalf,
    /// Пишущая часть соединения с буферизацией
    writer: BufWriter<OwnedWriteHalf>,
    /// Байты, прочитанные, но ещё не разобранные
    buffer: BytesMut,
    read_timeout: Duration,
    write_timeout: Duration,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl RespConnection {
    /// Устанавливает соединение и выполняет AUTH / CLIENT SETNAME.
    pub async fn open(options: &RedisOptions) -> ProbeResult<Self> {
        let addr = options.primary_endpoint().to_string();
        debug!("Connecting to {addr}");

        let stream = timeout(options.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| ConnectionError::ConnectionTimeout {
                address: addr.clone(),
            })?
            .map_err(|e| ConnectionError::ConnectionFailed {
                address: addr.clone(),
                reason: e.to_string(),
            })?;
        let _ = stream.set_nodelay(true);
        debug!("Connection established with {addr}");

        let (read_half, write_half) = stream.into_split();
        let mut conn = Self {
            addr,
            reader: read_half,
            writer: BufWriter::new(write_half),
            buffer: BytesMut::with_capacity(8192),
            read_timeout: options.sync_timeout,
            write_timeout: options.sync_timeout,
        };
        conn.handshake(options).await?;
        Ok(conn)
    }

    async fn handshake(
        &mut self,
        options: &RedisOptions,
    ) -> ProbeResult<()> {
        if let Some(password) = &options.password {
            let reply = match &options.user {
                Some(user) => self.request(["AUTH", user.as_str(), password.as_str()]).await,
                None => self.request(["AUTH", password.as_str()]).await,
            };
            match reply {
                Ok(_) => {}
                Err(err) if err.downcast_ref::<ConnectionError>().is_some_and(|e| {
                    matches!(e, ConnectionError::ServerError { .. })
                }) =>
                {
                    return Err(ConnectionError::AuthenticationFailed {
                        reason: err.root().to_string(),
                    }
                    .into());
                }
                Err(err) => return Err(err),
            }
        }
        if let Some(name) = &options.client_name {
            self.request(["CLIENT", "SETNAME", name.as_str()])
                .await
                .context("Failed to set client name")?;
        }
        Ok(())
    }

    /// Отправляет команду, не дожидаясь ответа.
    pub async fn send<I, A>(
        &mut self,
        args: I,
    ) -> ProbeResult<()>
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        let encoded = encode_command(args);
        trace!(bytes = encoded.len(), "Sending command to {}", self.addr);

        timeout(self.write_timeout, self.writer.write_all(&encoded))
            .await
            .map_err(|_| ConnectionError::WriteTimeout)??;
        timeout(self.write_timeout, self.writer.flush())
            .await
            .map_err(|_| ConnectionError::WriteTimeout)??;
        Ok(())
    }

    /// Читает следующий кадр без таймаута.
    ///
    /// Отмена future безопасна: непрочитанные байты остаются в буфере.
    pub async fn read_frame(&mut self) -> ProbeResult<RespFrame> {
        loop {
            if let Some(frame) = decode(&mut self.buffer)? {
                trace!("Frame received: {}", frame.describe());
                return Ok(frame);
            }
            if self.buffer.len() > MAX_READ_BUFFER {
                return Err(ConnectionError::Protocol {
                    reason: format!("Frame too large (>{MAX_READ_BUFFER} bytes)"),
                }
                .into());
            }
            let n = self.reader.read_buf(&mut self.buffer).await?;
            if n == 0 {
                return Err(ConnectionError::ConnectionClosed.into());
            }
        }
    }

    /// Читает ответ на команду с таймаутом чтения.
    pub async fn read_reply(&mut self) -> ProbeResult<RespFrame> {
        timeout(self.read_timeout, self.read_frame())
            .await
            .map_err(|_| ConnectionError::ReadTimeout)?
    }

    /// Отправляет команду и ждёт ответ. `-ERR` превращается в ServerError.
    pub async fn request<I, A>(
        &mut self,
        args: I,
    ) -> ProbeResult<RespFrame>
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        self.send(args).await.context("Failed to send command")?;
        match self
            .read_reply()
            .await
            .context("Failed to receive response")?
        {
            RespFrame::Error(message) => Err(ConnectionError::ServerError { message }.into()),
            frame => Ok(frame),
        }
    }

    /// Возвращает адрес сервера
    pub fn server_addr(&self) -> &str {
        &self.addr
    }

    /// Закрывает соединение
    pub async fn close(mut self) -> ProbeResult<()> {
        debug!("Closing connection to {}", self.addr);
        self.writer
            .shutdown()
            .await
            .context("Failed to shutdown connection")?;
        Ok(())
    }
}
