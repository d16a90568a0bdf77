use rand::Rng;
use std::time::{SystemTime, UNIX_EPOCH};

const CHARSET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Random digits appended to the timestamp component of a record id.
pub const RECORD_ID_SUFFIX_LEN: usize = 4;

/// Record id: milliseconds since epoch plus a random digit suffix, e.g.
/// `17171692041233276`. Lexicographically sortable by creation time;
/// collisions are handled by the caller retrying, widening `suffix_len`
/// when retries keep failing.
pub fn generate_time_based_id(suffix_len: usize) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let mut rng = rand::thread_rng();
    let suffix: String = (0..suffix_len)
        .map(|_| char::from(b'0' + rng.gen_range(0..10)))
        .collect();
    format!("{millis}{suffix}")
}

/// Random alphanumeric token, e.g. `Fz8xYc6a7LQw`. Used where uniqueness
/// matters but ordering does not, like staging-file names.
pub fn generate_short_id(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_based_ids_sort_by_time() {
        let a = generate_time_based_id(RECORD_ID_SUFFIX_LEN);
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = generate_time_based_id(RECORD_ID_SUFFIX_LEN);
        assert!(a < b);
    }

    #[test]
    fn time_based_id_is_all_digits_and_widens() {
        let id = generate_time_based_id(4);
        assert!(id.chars().all(|c| c.is_ascii_digit()));
        let wide = generate_time_based_id(8);
        assert_eq!(wide.len(), id.len() + 4);
    }

    #[test]
    fn short_id_has_requested_length() {
        assert_eq!(generate_short_id(12).len(), 12);
        assert!(generate_short_id(64).chars().all(|c| c.is_ascii_alphanumeric()));
    }
}
