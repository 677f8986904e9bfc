pub mod header_codec;
pub mod manifest_utils;
