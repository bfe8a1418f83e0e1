use crate::error::{DeployError, Result};

/// Strips an optional `0x`/`0X` prefix.
pub fn strip_hex_prefix(value: &str) -> &str {
    value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value)
}

/// Decodes a hex blob such as a `.bin` build artifact. Whitespace anywhere in
/// the text (trailing newlines, wrapped lines) is ignored.
pub fn decode_hex_blob(text: &str) -> std::result::Result<Vec<u8>, String> {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    let hex_part = strip_hex_prefix(&compact);

    if hex_part.is_empty() {
        return Err("no hex data".to_string());
    }

    hex::decode(hex_part).map_err(|e| format!("invalid hex: {}", e))
}

/// Validates a hex-encoded secp256k1 private key and returns it without prefix.
pub fn normalize_private_key(key: &str) -> Result<&str> {
    let key = strip_hex_prefix(key.trim());

    if key.is_empty() {
        return Err(DeployError::InvalidKey("private key is empty".to_string()));
    }

    if key.len() != 64 {
        return Err(DeployError::InvalidKey(format!(
            "expected 64 hex characters, got {}",
            key.len()
        )));
    }

    if !key.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(DeployError::InvalidKey(
            "private key contains non-hexadecimal characters".to_string(),
        ));
    }

    Ok(key)
}

/// Validates function name
pub fn validate_function_name(function_name: &str) -> Result<()> {
    let mut chars = function_name.chars();
    let first = chars
        .next()
        .ok_or_else(|| DeployError::UnknownFunction(String::new()))?;

    if !(first.is_ascii_alphabetic() || first == '_')
        || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(DeployError::UnknownFunction(function_name.to_string()));
    }

    Ok(())
}

/// Formats a wei amount as gwei with up to nine decimals.
pub fn format_gwei(wei: u128) -> String {
    let whole = wei / 1_000_000_000;
    let frac = wei % 1_000_000_000;
    if frac == 0 {
        format!("{} gwei", whole)
    } else {
        let frac = format!("{:09}", frac);
        format!("{}.{} gwei", whole, frac.trim_end_matches('0'))
    }
}

/// Creates user-friendly error messages for common RPC errors
pub fn interpret_rpc_error(error: &str) -> String {
    let lower = error.to_lowercase();
    if lower.contains("execution reverted") {
        "the contract reverted execution; its requirements were not met".to_string()
    } else if lower.contains("insufficient funds") {
        "the deploying account cannot cover gas costs; fund it and retry".to_string()
    } else if lower.contains("intrinsic gas too low") || lower.contains("gas required exceeds") {
        "gas limit too low; raise ethereum.gas_limit".to_string()
    } else if lower.contains("nonce too low") {
        "nonce too low; another transaction from this account was already mined with it"
            .to_string()
    } else if lower.contains("replacement transaction underpriced")
        || lower.contains("already known")
    {
        "a pending transaction with this nonce already exists".to_string()
    } else if lower.contains("invalid sender") || lower.contains("invalid chain id") {
        "the endpoint rejected the signature; check ethereum.chain_id".to_string()
    } else if lower.contains("connection refused") || lower.contains("network unreachable") {
        "cannot connect to the RPC endpoint; check ethereum.rpc_url".to_string()
    } else if lower.contains("timeout") || lower.contains("timed out") {
        "the RPC endpoint did not answer in time".to_string()
    } else if lower.contains("method not found") {
        "the RPC endpoint does not support this method".to_string()
    } else {
        error.to_string()
    }
}
