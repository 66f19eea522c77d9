/// 健康检查
pub mod health;

/// API Key 控制台接口
pub mod keys;

/// OG 图生成
pub mod og;

/// 匿名限流与 API Key 配额
pub mod quota;

/// Pro 等候名单
pub mod waitlist;
