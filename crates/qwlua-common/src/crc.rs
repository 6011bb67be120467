// crc.rs -- 16-bit CCITT CRC (polynomial 0x1021)
//
// Copyright (C) 1996-1997 Id Software, Inc.
// Licensed under the GNU General Public License v2 or later.

// CRC-16/IBM-3740, also known as CRC-16/CCITT-FALSE.

use crc::{Crc, CRC_16_IBM_3740};

const CRC_CALC: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Compute the CRC of an entire block of data.
pub fn crc_block(data: &[u8]) -> u16 {
    CRC_CALC.checksum(data)
}
