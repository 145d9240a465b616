//! TLV/Base64 QR payload for simplified invoices.
//!
//! Five TLV fields — seller name (1), seller VAT number (2), ISO-8601
//! timestamp (3), VAT amount (4), total inc VAT (5) — concatenated and
//! Base64-encoded. The renderer turns the payload into an actual QR
//! image downstream.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::NaiveDateTime;
use rust_decimal::Decimal;

use crate::config::SellerIdentity;

const TAG_SELLER_NAME: u8 = 1;
const TAG_SELLER_VAT: u8 = 2;
const TAG_TIMESTAMP: u8 = 3;
const TAG_VAT_AMOUNT: u8 = 4;
const TAG_TOTAL_INC_VAT: u8 = 5;

fn push_tlv(buf: &mut Vec<u8>, tag: u8, value: &str) {
    let bytes = value.as_bytes();
    // One-byte length field; longer values are truncated at a char
    // boundary.
    let mut len = bytes.len().min(255);
    while !value.is_char_boundary(len) {
        len -= 1;
    }
    buf.push(tag);
    buf.push(len as u8);
    buf.extend_from_slice(&bytes[..len]);
}

/// Build the Base64 TLV payload for one simplified invoice.
pub fn tlv_payload(
    seller: &SellerIdentity,
    issued_at: NaiveDateTime,
    vat_amount: Decimal,
    total_inc_vat: Decimal,
) -> String {
    let mut buf = Vec::with_capacity(128);
    push_tlv(&mut buf, TAG_SELLER_NAME, &seller.name);
    push_tlv(&mut buf, TAG_SELLER_VAT, &seller.vat_number);
    push_tlv(
        &mut buf,
        TAG_TIMESTAMP,
        &issued_at.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
    );
    push_tlv(&mut buf, TAG_VAT_AMOUNT, &vat_amount.to_string());
    push_tlv(&mut buf, TAG_TOTAL_INC_VAT, &total_inc_vat.to_string());
    STANDARD.encode(&buf)
}
