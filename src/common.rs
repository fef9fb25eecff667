//! 通用模块，包含客户端配置

pub mod config;

pub use self::config::ClientConfig;
