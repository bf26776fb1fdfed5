#[derive(Debug, Clone)]
pub struct PacketReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn read_u8(&mut self) -> Option<u8> {
        if self.remaining() < 1 {
            return None;
        }
        let value = self.data[self.pos];
        self.pos += 1;
        Some(value)
    }

    pub fn read_u16_be(&mut self) -> Option<u16> {
        let hi = u16::from(self.peek(0)?);
        let lo = u16::from(self.peek(1)?);
        self.pos += 2;
        Some((hi << 8) | lo)
    }

    pub fn read_u32_be(&mut self) -> Option<u32> {
        if self.remaining() < 4 {
            return None;
        }
        let mut value = 0u32;
        for offset in 0..4 {
            value = (value << 8) | u32::from(self.data[self.pos + offset]);
        }
        self.pos += 4;
        Some(value)
    }

    pub fn read_u64_be(&mut self) -> Option<u64> {
        if self.remaining() < 8 {
            return None;
        }
        let mut value = 0u64;
        for offset in 0..8 {
            value = (value << 8) | u64::from(self.data[self.pos + offset]);
        }
        self.pos += 8;
        Some(value)
    }

    pub fn read_i32_be(&mut self) -> Option<i32> {
        self.read_u32_be().map(|value| value as i32)
    }

    pub fn read_i64_be(&mut self) -> Option<i64> {
        self.read_u64_be().map(|value| value as i64)
    }

    pub fn read_f32_be(&mut self) -> Option<f32> {
        self.read_u32_be().map(f32::from_bits)
    }

    pub fn read_f64_be(&mut self) -> Option<f64> {
        self.read_u64_be().map(f64::from_bits)
    }

    pub fn read_bool(&mut self) -> Option<bool> {
        self.read_u8().map(|value| value != 0)
    }

    /// Base-128 varint, least-significant group first, high bit continues.
    pub fn read_varint(&mut self) -> Option<u64> {
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = self.read_u8()?;
            if shift >= 63 && byte > 1 {
                return None;
            }
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Some(value);
            }
            shift += 7;
            if shift >= 64 {
                return None;
            }
        }
    }

    pub fn read_timestamp(&mut self) -> Option<u64> {
        self.read_varint()
    }

    pub fn read_string(&mut self) -> Option<String> {
        let len = self.read_varint()? as usize;
        if len == 0 {
            return Some(String::new());
        }
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec()).ok()
    }

    pub fn read_bytes(&mut self, len: usize) -> Option<&'a [u8]> {
        if self.remaining() < len {
            return None;
        }
        let start = self.pos;
        self.pos += len;
        Some(&self.data[start..start + len])
    }

    fn peek(&self, offset: usize) -> Option<u8> {
        self.data.get(self.pos + offset).copied()
    }
}

#[derive(Debug, Default, Clone)]
pub struct PacketWriter {
    data: Vec<u8>,
}

impl PacketWriter {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    pub fn write_u8(&mut self, value: u8) {
        self.data.push(value);
    }

    pub fn write_u16_be(&mut self, value: u16) {
        self.data.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_u32_be(&mut self, value: u32) {
        self.data.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_u64_be(&mut self, value: u64) {
        self.data.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_i32_be(&mut self, value: i32) {
        self.write_u32_be(value as u32);
    }

    pub fn write_i64_be(&mut self, value: i64) {
        self.write_u64_be(value as u64);
    }

    pub fn write_f32_be(&mut self, value: f32) {
        self.write_u32_be(value.to_bits());
    }

    pub fn write_f64_be(&mut self, value: f64) {
        self.write_u64_be(value.to_bits());
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_u8(u8::from(value));
    }

    pub fn write_varint(&mut self, value: u64) {
        let mut rest = value;
        loop {
            let mut byte = (rest & 0x7f) as u8;
            rest >>= 7;
            if rest != 0 {
                byte |= 0x80;
            }
            self.data.push(byte);
            if rest == 0 {
                return;
            }
        }
    }

    pub fn write_timestamp(&mut self, value: u64) {
        self.write_varint(value);
    }

    pub fn write_string(&mut self, value: &str) {
        self.write_varint(value.len() as u64);
        self.write_bytes(value.as_bytes());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }
}
