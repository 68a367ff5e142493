pub mod aws_sse;
