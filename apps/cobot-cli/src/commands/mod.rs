//! 命令定义和实现

pub mod monitor;
pub mod r#move;
pub mod sim;
pub mod stop;

pub use monitor::MonitorCommand;
pub use r#move::MoveCommand;
pub use sim::SimCommand;
pub use stop::StopCommand;
