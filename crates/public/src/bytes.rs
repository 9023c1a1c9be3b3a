/*
 * Copyright (c) 2024 Yunshan Networks
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

// Readers return None instead of panicking, payloads come straight from
// syscall buffers and may be truncated anywhere.

pub fn read_u16_be(bs: &[u8]) -> Option<u16> {
    Some(u16::from_be_bytes(bs.get(..2)?.try_into().ok()?))
}

pub fn read_u16_le(bs: &[u8]) -> Option<u16> {
    Some(u16::from_le_bytes(bs.get(..2)?.try_into().ok()?))
}

pub fn read_u24_le(bs: &[u8]) -> Option<u32> {
    let b = bs.get(..3)?;
    Some(b[0] as u32 | (b[1] as u32) << 8 | (b[2] as u32) << 16)
}

pub fn read_u32_be(bs: &[u8]) -> Option<u32> {
    Some(u32::from_be_bytes(bs.get(..4)?.try_into().ok()?))
}

// Printable rendering used for payload summaries, non-printable bytes become '.'
pub fn to_printable(bs: &[u8], limit: usize) -> String {
    bs.iter()
        .take(limit)
        .map(|b| {
            if b.is_ascii_graphic() || *b == b' ' {
                *b as char
            } else {
                '.'
            }
        })
        .collect()
}
