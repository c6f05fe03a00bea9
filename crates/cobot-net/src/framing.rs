//! 报文分帧
//!
//! 状态通道是字节流，报文以 4 字节大端长度前缀分界。
//! `TelegramReader` 在内部缓冲区中累积数据：读超时发生在报文中间时，
//! 已读到的字节保留到下一次调用，字节流不会错位。

use crate::NetError;
use cobot_protocol::{LENGTH_FIELD_SIZE, MAX_TELEGRAM_LEN, declared_len};
use std::io::{ErrorKind, Read};

/// 单次读取的块大小
const READ_CHUNK_SIZE: usize = 4096;

/// 长度前缀分帧读取器
pub struct TelegramReader<R> {
    inner: R,
    /// 已接收但尚未组成完整报文的字节
    pending: Vec<u8>,
    chunk: Box<[u8]>,
}

impl<R: Read> TelegramReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            pending: Vec::with_capacity(READ_CHUNK_SIZE),
            chunk: vec![0u8; READ_CHUNK_SIZE].into_boxed_slice(),
        }
    }

    pub fn get_ref(&self) -> &R {
        &self.inner
    }

    /// 缓冲区中尚未组帧的字节数
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// 读取一个完整报文（含长度前缀）
    ///
    /// # 错误
    /// - `Timeout`: 底层读超时（已读字节保留）
    /// - `Closed`: 对端关闭连接
    /// - `InvalidLength`: 长度前缀小于 4 或超过上限（流无法再同步）
    /// - `Io`: 其他 IO 错误
    pub fn read_telegram(&mut self) -> Result<Vec<u8>, NetError> {
        loop {
            if let Some(telegram) = self.try_extract()? {
                return Ok(telegram);
            }

            let n = match self.inner.read(&mut self.chunk) {
                Ok(0) => return Err(NetError::Closed),
                Ok(n) => n,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    return Err(NetError::Timeout);
                },
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(NetError::Io(e)),
            };
            self.pending.extend_from_slice(&self.chunk[..n]);
        }
    }

    fn try_extract(&mut self) -> Result<Option<Vec<u8>>, NetError> {
        let Some(declared) = declared_len(&self.pending) else {
            return Ok(None);
        };
        if !(LENGTH_FIELD_SIZE..=MAX_TELEGRAM_LEN).contains(&declared) {
            return Err(NetError::InvalidLength(declared));
        }
        if self.pending.len() < declared {
            return Ok(None);
        }
        Ok(Some(self.pending.drain(..declared).collect()))
    }
}
