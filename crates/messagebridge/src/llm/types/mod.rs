pub mod bedrock;
pub mod messages;
