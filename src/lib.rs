// Keyphrase: key phrase extraction for patent texts.
//
// This is the library root. A seq2seq model proposes raw candidate phrases;
// the post-processor cleans them into a short, non-redundant list.

pub mod config;
pub mod keywords;
pub mod output;
pub mod postprocess;

#[cfg(feature = "web")]
pub mod web;
