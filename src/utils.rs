//! Identifier helpers: uuid7 rendered through bech32 with a readable prefix

use bech32::Bech32m;
use uuid7::uuid7;

// construct a unique id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

pub fn new_report_id() -> anyhow::Result<String> {
    new_uuid_to_bech32("report_")
}

pub fn new_correction_id() -> anyhow::Result<String> {
    new_uuid_to_bech32("corr_")
}
