//! Parameter-index codec.
//!
//! When the constraints chosen by `xBestIndex` do not line up with the
//! statement's parameter order, the constraint → parameter mapping is
//! carried to `xFilter` through `idxStr`. SQLite requires that string to be
//! NUL terminated and printable, so each parameter position is written as a
//! fixed-width run of 6-bit groups, least-significant group first, each
//! biased by 33 into the printable ASCII range (`'!'..='`'`).
//!
//! The width is fixed to what an `i32` needs rather than what SQLite's
//! current column limit needs, so the format does not change if that limit
//! is raised. Tokens produced here are a wire format between two callbacks:
//! the layout must stay bit-for-bit stable.
//!
//! Round-trip law: `decode(encode(x)) == x` for every `x` in `0..=i32::MAX`.

use stmtvtab_error::{Result, StatementVtabError};

/// Bits carried by each token character.
const BITS_PER_CHAR: u32 = 6;

/// Bias added to each 6-bit group to land in printable ASCII.
const CHAR_BIAS: u8 = 33;

const GROUP_MASK: u32 = (1 << BITS_PER_CHAR) - 1;

/// Characters used to encode one parameter position: `ceil(32 / 6)`.
pub const TOKEN_WIDTH: usize = (i32::BITS as usize).div_ceil(BITS_PER_CHAR as usize);

/// Write `position` into entry `slot` of `token`.
///
/// `token` must already be at least `(slot + 1) * TOKEN_WIDTH` bytes long.
///
/// # Panics
///
/// Panics if `token` is too short for `slot`. `position` must be
/// non-negative; this is checked in debug builds only.
pub fn encode_param_index(slot: usize, token: &mut [u8], position: i32) {
    debug_assert!(position >= 0, "parameter position must be non-negative");
    #[allow(clippy::cast_sign_loss)]
    let bits = position as u32;
    let entry = &mut token[slot * TOKEN_WIDTH..(slot + 1) * TOKEN_WIDTH];
    for (j, byte) in entry.iter_mut().enumerate() {
        #[allow(clippy::cast_possible_truncation)]
        let group = ((bits >> (BITS_PER_CHAR as usize * j)) & GROUP_MASK) as u8;
        *byte = group + CHAR_BIAS;
    }
}

/// Read entry `slot` of `token` back into a parameter position.
pub fn decode_param_index(slot: usize, token: &[u8]) -> Result<i32> {
    let entry = slot
        .checked_mul(TOKEN_WIDTH)
        .and_then(|start| token.get(start..start + TOKEN_WIDTH))
        .ok_or(StatementVtabError::MalformedToken { slot })?;
    // The top group can carry bits past 31; widen so they are caught below
    // instead of being shifted out.
    let mut bits: u64 = 0;
    for (j, &byte) in entry.iter().enumerate() {
        let group = byte
            .checked_sub(CHAR_BIAS)
            .filter(|g| u32::from(*g) <= GROUP_MASK)
            .ok_or(StatementVtabError::MalformedToken { slot })?;
        bits |= u64::from(group) << (BITS_PER_CHAR as usize * j);
    }
    i32::try_from(bits).map_err(|_| StatementVtabError::MalformedToken { slot })
}

/// Encode a full list of parameter positions, one entry per slot.
///
/// Fails instead of aborting when the buffer cannot be sized or reserved.
pub fn encode_param_map(positions: &[i32]) -> Result<String> {
    let len = positions
        .len()
        .checked_mul(TOKEN_WIDTH)
        .and_then(|n| n.checked_add(1))
        .ok_or(StatementVtabError::TooManyConstraints {
            count: positions.len(),
        })?;
    let mut buf: Vec<u8> = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| StatementVtabError::OutOfMemory)?;
    buf.resize(len - 1, 0);
    for (slot, &position) in positions.iter().enumerate() {
        encode_param_index(slot, &mut buf, position);
    }
    // Every byte is in 33..=96, so this is always valid ASCII.
    String::from_utf8(buf).map_err(|_| StatementVtabError::MalformedToken { slot: 0 })
}

/// Number of complete entries in `token`.
#[must_use]
pub fn param_map_len(token: &str) -> usize {
    token.len() / TOKEN_WIDTH
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn token_width_covers_i32() {
        assert_eq!(TOKEN_WIDTH, 6);
        assert!(TOKEN_WIDTH as u32 * BITS_PER_CHAR >= i32::BITS);
    }

    #[test]
    fn encodes_least_significant_group_first() {
        let mut token = [0_u8; TOKEN_WIDTH];
        encode_param_index(0, &mut token, 3);
        assert_eq!(&token, b"$!!!!!");

        encode_param_index(0, &mut token, 64);
        assert_eq!(&token, b"!\"!!!!");
    }

    #[test]
    fn zero_encodes_to_bias_only() {
        let mut token = [0_u8; TOKEN_WIDTH];
        encode_param_index(0, &mut token, 0);
        assert!(token.iter().all(|&b| b == CHAR_BIAS));
        assert_eq!(decode_param_index(0, &token).unwrap(), 0);
    }

    #[test]
    fn max_value_round_trips() {
        let mut token = [0_u8; TOKEN_WIDTH];
        encode_param_index(0, &mut token, i32::MAX);
        assert_eq!(decode_param_index(0, &token).unwrap(), i32::MAX);
    }

    #[test]
    fn entries_do_not_overlap() {
        let token = encode_param_map(&[3, 1, 2000]).unwrap();
        assert_eq!(token.len(), 3 * TOKEN_WIDTH);
        assert_eq!(param_map_len(&token), 3);
        let bytes = token.as_bytes();
        assert_eq!(decode_param_index(0, bytes).unwrap(), 3);
        assert_eq!(decode_param_index(1, bytes).unwrap(), 1);
        assert_eq!(decode_param_index(2, bytes).unwrap(), 2000);
    }

    #[test]
    fn empty_map_is_empty_token() {
        let token = encode_param_map(&[]).unwrap();
        assert!(token.is_empty());
        assert_eq!(param_map_len(&token), 0);
    }

    #[test]
    fn decode_rejects_truncated_token() {
        let token = encode_param_map(&[5]).unwrap();
        let err = decode_param_index(1, token.as_bytes()).unwrap_err();
        assert_eq!(err, StatementVtabError::MalformedToken { slot: 1 });
        let err = decode_param_index(0, &token.as_bytes()[..3]).unwrap_err();
        assert_eq!(err, StatementVtabError::MalformedToken { slot: 0 });
    }

    #[test]
    fn decode_rejects_out_of_alphabet_bytes() {
        let err = decode_param_index(0, b" !!!!!").unwrap_err();
        assert_eq!(err, StatementVtabError::MalformedToken { slot: 0 });
        let err = decode_param_index(0, b"a!!!!!").unwrap_err();
        assert_eq!(err, StatementVtabError::MalformedToken { slot: 0 });
    }

    #[test]
    fn decode_rejects_values_above_i32_max() {
        // Group 5 holds bits 30..36; 2 sets bit 31.
        let err = decode_param_index(0, b"!!!!!#").unwrap_err();
        assert_eq!(err, StatementVtabError::MalformedToken { slot: 0 });
    }

    proptest! {
        #[test]
        fn round_trip_any_non_negative_i32(position in 0..=i32::MAX) {
            let mut token = [0_u8; TOKEN_WIDTH];
            encode_param_index(0, &mut token, position);
            prop_assert_eq!(decode_param_index(0, &token).unwrap(), position);
        }

        #[test]
        fn tokens_are_printable_and_nul_free(positions in proptest::collection::vec(0..=i32::MAX, 0..16)) {
            let token = encode_param_map(&positions).unwrap();
            prop_assert_eq!(token.len(), positions.len() * TOKEN_WIDTH);
            prop_assert!(token.bytes().all(|b| b.is_ascii_graphic()));
            for (slot, &position) in positions.iter().enumerate() {
                prop_assert_eq!(decode_param_index(slot, token.as_bytes()).unwrap(), position);
            }
        }
    }
}
