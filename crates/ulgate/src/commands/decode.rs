//! `ulgate decode`: run a payload through the device codecs.

use ulgate_core::PayloadEncoding;
use ulgate_core::codec;

use crate::cli::{DecodeArgs, EncodingArg};
use crate::error::CliError;

pub fn handle(args: &DecodeArgs) -> Result<(), CliError> {
    let encoding = match args.encoding {
        EncodingArg::Ul => PayloadEncoding::UltraLight,
        EncodingArg::Json => PayloadEncoding::Json,
        EncodingArg::Compact => PayloadEncoding::Compact,
    };

    let groups = codec::decode_measures(encoding, args.payload.as_bytes(), args.attr.as_deref())
        .map_err(|source| CliError::Decode { source })?;

    tracing::debug!(%encoding, groups = groups.len(), "payload decoded");
    println!("{}", serde_json::to_string_pretty(&groups)?);
    Ok(())
}
