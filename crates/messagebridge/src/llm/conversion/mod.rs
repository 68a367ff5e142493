pub mod bedrock;
pub mod stream;
