// Keyword extraction: seq2seq generation plus the extraction service that
// feeds its raw output through the post-processor.

pub mod beam;
pub mod onnx;
pub mod service;
pub mod traits;
