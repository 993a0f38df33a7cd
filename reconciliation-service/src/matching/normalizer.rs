//! Canonicalization of free-form bank text.
//!
//! Bank descriptions carry channel noise ("ACH PMT", "CHK DEP") that
//! says nothing about the counterparty. Normalization strips it so the
//! similarity scorer only sees name-bearing tokens.

/// Tokens dropped during normalization. Closed set; matched after
/// uppercasing.
const NOISE_WORDS: &[&str] = &[
    "PAYMENT",
    "DEPOSIT",
    "TRANSFER",
    "WITHDRAWAL",
    "CREDIT",
    "DEBIT",
    "CHK",
    "CHECK",
    "CHEQUE",
    "ACH",
    "WIRE",
    "EFT",
    "ONLINE",
    "ELECTRONIC",
    "EBANK",
    "INTERNET",
    "MOBILE",
    "PMT",
    "DEP",
    "TRF",
    "TXN",
    "REF",
    "POS",
    "FROM",
    "TO",
    "FOR",
    "THE",
    "AND",
    "PENDING",
    "CLEARED",
    "POSTED",
    "MEMO",
];

/// Uppercase, collapse everything outside `[A-Z0-9]` to spaces, drop
/// noise words, and rejoin with single spaces. Idempotent.
pub fn normalize(input: &str) -> String {
    input
        .to_uppercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .filter(|token| !NOISE_WORDS.contains(token))
        .collect::<Vec<_>>()
        .join(" ")
}
