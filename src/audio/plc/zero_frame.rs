//! Static mSBC frame of digital silence.
//!
//! Decoding it right after a bad frame yields the decoder's zero-input
//! response, which seeds the start of the concealed frame.

use crate::audio::constants::{MSBC_FRAME_LEN, PLC_FS};

#[rustfmt::skip]
pub const MSBC_ZERO_FRAME: [u8; MSBC_FRAME_LEN] = [
    0xad, 0x00, 0x00, 0xc5, 0x00, 0x00, 0x00, 0x00,
    0x77, 0x6d, 0xb6, 0xdd, 0xdb, 0x6d, 0xb7, 0x76, 0xdb, 0x6d, 0xdd, 0xb6, 0xdb,
    0x77, 0x6d, 0xb6, 0xdd, 0xdb, 0x6d, 0xb7, 0x76, 0xdb, 0x6d, 0xdd, 0xb6, 0xdb,
    0x77, 0x6d, 0xb6, 0xdd, 0xdb, 0x6d, 0xb7, 0x76, 0xdb, 0x6d, 0xdd, 0xb6, 0xdb,
    0x77, 0x6d, 0xb6, 0xdd, 0xdb, 0x6d, 0xb7, 0x76, 0xdb, 0x6c,
];

/// PCM the zero frame encodes.
pub const MSBC_ZERO_PCM: [i16; PLC_FS] = [0; PLC_FS];
