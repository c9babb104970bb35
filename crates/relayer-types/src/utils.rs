use alloy::primitives::B256;

/// Truncates a transaction hash for display.
pub fn truncate_hash(hash: &B256) -> String {
	let hash_str = hex::encode(hash.as_slice());
	format!("0x{}..{}", &hash_str[..8], &hash_str[hash_str.len() - 4..])
}
