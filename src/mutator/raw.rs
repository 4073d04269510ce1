//! Byte-level calldata mutation for targets without an ABI

use rand::Rng;

const PUSH4: u8 = 0x63;
const EQ: u8 = 0x14;
const SELECTOR_LEN: usize = 4;
/// Bytes rewritten by the wide strategy
const WIDE_EDITS: usize = 10;

/// Zero bytes appended to every raw input before execution
pub const CALLDATA_PADDING: usize = 200;

/// Extract the 4-byte selectors compared by the dispatcher (`PUSH4 <sel> ... EQ`)
pub fn extract_selectors(code: &[u8]) -> Vec<[u8; 4]> {
    let mut selectors: Vec<[u8; 4]> = Vec::new();
    let mut pc = 0;
    while pc < code.len() {
        let op = code[pc];
        if op == PUSH4 && pc + 5 < code.len() {
            let sel = [code[pc + 1], code[pc + 2], code[pc + 3], code[pc + 4]];
            // `PUSH4 sel EQ` or `PUSH4 sel DUP2 EQ`
            let next = code[pc + 5];
            let followed_by_eq =
                next == EQ || (next == 0x81 && code.get(pc + 6).copied() == Some(EQ));
            if followed_by_eq && !selectors.contains(&sel) {
                selectors.push(sel);
            }
        }
        // skip PUSH immediates
        if (0x60..=0x7f).contains(&op) {
            pc += (op - 0x5f) as usize;
        }
        pc += 1;
    }
    selectors
}

/// Resize to `learned_len` (never below the selector) then overwrite either one
/// random byte or ten random bytes after the selector
pub fn mutate_calldata<R: Rng + ?Sized>(input: &[u8], learned_len: usize, rng: &mut R) -> Vec<u8> {
    let mut out = input.to_vec();
    out.resize(learned_len.max(SELECTOR_LEN), 0);
    if out.len() <= SELECTOR_LEN {
        return out;
    }
    let edits = if rng.gen_bool(0.5) { 1 } else { WIDE_EDITS };
    for _ in 0..edits {
        let idx = rng.gen_range(SELECTOR_LEN..out.len());
        out[idx] = rng.gen();
    }
    out
}

pub fn pad_calldata(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len() + CALLDATA_PADDING);
    out.extend_from_slice(input);
    out.resize(input.len() + CALLDATA_PADDING, 0);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_extract_selectors() {
        // PUSH1 0 CALLDATALOAD PUSH1 0xe0 SHR DUP1 PUSH4 a9059cbb EQ PUSH2 0010 JUMPI
        // DUP1 PUSH4 70a08231 EQ
        let code = hex::decode("60003560e01c8063a9059cbb1461001057806370a0823114").unwrap();
        let selectors = extract_selectors(&code);
        assert_eq!(selectors, vec![[0xa9, 0x05, 0x9c, 0xbb], [0x70, 0xa0, 0x82, 0x31]]);
    }

    #[test]
    fn test_push_data_is_skipped() {
        // PUSH32 whose immediate contains PUSH4 xx EQ
        let mut code = vec![0x7f];
        code.extend_from_slice(&[0x63, 1, 2, 3, 4, 0x14]);
        code.resize(33, 0);
        code.push(0x00);
        assert!(extract_selectors(&code).is_empty());
    }

    #[test]
    fn test_mutate_keeps_selector() {
        let mut rng = StdRng::seed_from_u64(11);
        let input = [0xa9, 0x05, 0x9c, 0xbb];
        for _ in 0..100 {
            let out = mutate_calldata(&input, 68, &mut rng);
            assert_eq!(out.len(), 68);
            assert_eq!(&out[..4], &input);
        }
        assert_eq!(mutate_calldata(&input, 0, &mut rng), input.to_vec());
    }

    #[test]
    fn test_padding() {
        assert_eq!(pad_calldata(&[1, 2]).len(), 2 + CALLDATA_PADDING);
    }
}
