//! TCP 通道实现

use crate::framing::TelegramReader;
use crate::{CommandSink, NetError, TelegramSource};
use std::io::{ErrorKind, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

/// 状态通道（读端）
///
/// 持有状态套接字的一个克隆，交给报文读取线程独占使用。
pub struct TcpTelegramSource {
    reader: TelegramReader<TcpStream>,
}

impl TcpTelegramSource {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            reader: TelegramReader::new(stream),
        }
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.reader.get_ref().peer_addr().ok()
    }
}

impl TelegramSource for TcpTelegramSource {
    fn receive(&mut self) -> Result<Vec<u8>, NetError> {
        self.reader.read_telegram()
    }
}

/// 反向命令通道（写端）
pub struct ReverseChannel {
    stream: TcpStream,
    peer: SocketAddr,
}

impl ReverseChannel {
    /// 配置控制器回连的套接字
    ///
    /// 监听套接字是非阻塞的，accept 出的连接在部分平台上会继承该属性，
    /// 这里显式恢复为阻塞写 + 写超时。
    pub fn new(stream: TcpStream, peer: SocketAddr, write_timeout: Duration) -> std::io::Result<Self> {
        stream.set_nonblocking(false)?;
        stream.set_nodelay(true)?;
        stream.set_write_timeout(Some(write_timeout))?;
        Ok(Self { stream, peer })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl CommandSink for ReverseChannel {
    fn send(&mut self, frame: &[u8]) -> Result<(), NetError> {
        match self.stream.write_all(frame) {
            Ok(()) => Ok(()),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                Err(NetError::Timeout)
            },
            Err(e) => Err(NetError::Io(e)),
        }
    }
}

impl Drop for ReverseChannel {
    fn drop(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}
