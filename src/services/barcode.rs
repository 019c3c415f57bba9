use ring::rand::{SecureRandom, SystemRandom};
use uuid::Uuid;

/// Namespace for replacement card ids issued by batch deactivation.
const REPLACEMENT_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2b0e_93a4_4d57_9e0b_5a1d_c8e2_7f31);

pub const REPLACEMENT_PREFIX: &str = "REPL-";

#[derive(thiserror::Error, Debug)]
#[error("System random number generator failed")]
pub struct RandomnessError;

/// Generates a fresh 16-character lowercase hex barcode value.
pub fn generate_barcode_value() -> Result<String, RandomnessError> {
    random_hex::<8>()
}

/// Opaque secret for cards that are not yet bound to a patient.
pub fn generate_unbound_secret() -> Result<String, RandomnessError> {
    random_hex::<16>()
}

fn random_hex<const N: usize>() -> Result<String, RandomnessError> {
    let mut bytes = [0u8; N];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| RandomnessError)?;
    Ok(hex::encode(bytes))
}

/// UUIDv5 of the original card id; a card is deactivated at most once.
pub fn replacement_id(original_id: Uuid) -> Uuid {
    Uuid::new_v5(&REPLACEMENT_NAMESPACE, original_id.as_bytes())
}

pub fn replacement_barcode(original_barcode: &str) -> String {
    format!("{REPLACEMENT_PREFIX}{original_barcode}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_barcodes_are_sixteen_hex_digits() {
        let barcode = generate_barcode_value().unwrap();

        assert_eq!(barcode.len(), 16);
        assert!(barcode
            .chars()
            .all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
        assert_ne!(barcode, generate_barcode_value().unwrap());
    }

    #[test]
    fn replacement_ids_are_deterministic_per_original() {
        let original = Uuid::new_v4();

        assert_eq!(replacement_id(original), replacement_id(original));
        assert_ne!(replacement_id(original), original);
        assert_ne!(replacement_id(original), replacement_id(Uuid::new_v4()));
    }

    #[test]
    fn replacement_barcode_is_prefixed() {
        assert_eq!(replacement_barcode("ABC123"), "REPL-ABC123");
    }
}
