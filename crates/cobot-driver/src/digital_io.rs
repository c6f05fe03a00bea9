//! 数字 I/O 视图
//!
//! 从最新状态快照派生出两个逻辑设备：
//!
//! | device_id | 设备 | 端口数 | 读写 |
//! |-----------|------|--------|------|
//! | 0 | 输入组 | 64 | 只读 |
//! | 1 | 输出组 | 8 | 读写 |
//!
//! 写输出不会产生独立的报文：请求电平记录在命令目标中，随下一帧命令的控制字送达。
//! 链路未连接（或尚未收到任何报文）时所有调用返回 `NotConnected`。

use crate::error::DigitalIoError;
use crate::state::DriverContext;
use cobot_protocol::{DIGITAL_INPUT_PORTS, DIGITAL_OUTPUT_PORTS, PortStatus, RobotState};
use std::sync::Arc;

/// 逻辑 I/O 设备
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IoDevice {
    Inputs = 0,
    Outputs = 1,
}

impl IoDevice {
    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn port_count(self) -> u8 {
        match self {
            Self::Inputs => DIGITAL_INPUT_PORTS,
            Self::Outputs => DIGITAL_OUTPUT_PORTS,
        }
    }

    pub fn is_writable(self) -> bool {
        self == Self::Outputs
    }
}

impl TryFrom<u8> for IoDevice {
    type Error = DigitalIoError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Inputs),
            1 => Ok(Self::Outputs),
            other => Err(DigitalIoError::UnknownDevice(other)),
        }
    }
}

/// 数字 I/O 句柄
///
/// 廉价 Clone，生命周期与驱动上下文绑定。
#[derive(Clone)]
pub struct DigitalIo {
    device: IoDevice,
    ctx: Arc<DriverContext>,
}

impl DigitalIo {
    pub(crate) fn new(device: IoDevice, ctx: Arc<DriverContext>) -> Self {
        Self { device, ctx }
    }

    pub fn device(&self) -> IoDevice {
        self.device
    }

    pub fn port_count(&self) -> u8 {
        self.device.port_count()
    }

    pub fn is_connected(&self) -> bool {
        self.ctx.is_connected()
    }

    /// 读取端口电平
    ///
    /// 输出组优先返回控制器报告的实际电平；旧版本报文不携带输出位时，
    /// 返回最近一次请求的电平。
    pub fn read(&self, port: u8) -> Result<PortStatus, DigitalIoError> {
        self.check_port(port)?;
        let state = self.connected_state()?;
        let status = match self.device {
            IoDevice::Inputs => state.digital_inputs.status(port),
            IoDevice::Outputs if state.has_output_bits() => state.digital_outputs.status(port),
            IoDevice::Outputs => self.ctx.target.update(|t| t.outputs.status(port)),
        };
        Ok(status)
    }

    /// 请求设置输出端口电平（随下一帧命令发送）
    pub fn write(&self, port: u8, status: PortStatus) -> Result<(), DigitalIoError> {
        if !self.device.is_writable() {
            return Err(DigitalIoError::ReadOnly(self.device.id()));
        }
        self.check_port(port)?;
        if !self.ctx.is_connected() {
            return Err(DigitalIoError::NotConnected);
        }
        self.ctx.target.update(|t| t.set_output(port, status));
        Ok(())
    }

    fn check_port(&self, port: u8) -> Result<(), DigitalIoError> {
        let count = self.port_count();
        if port >= count {
            return Err(DigitalIoError::InvalidPort { port, count });
        }
        Ok(())
    }

    fn connected_state(&self) -> Result<Arc<RobotState>, DigitalIoError> {
        if !self.ctx.is_connected() {
            return Err(DigitalIoError::NotConnected);
        }
        self.ctx.latest_state().ok_or(DigitalIoError::NotConnected)
    }
}

impl std::fmt::Debug for DigitalIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DigitalIo")
            .field("device", &self.device)
            .field("connected", &self.is_connected())
            .finish()
    }
}
