#[derive(Debug, Clone, PartialEq)]
pub struct N5ChunkHeader {
    pub(crate) mode: N5ChunkMode,
    /// Block shape in N5 (column-major) order, i.e. reversed relative to the zarr view.
    pub(crate) shape: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum N5ChunkMode {
    Default,
    VarLen { num_el: u32 },
    Object,
}

impl N5ChunkMode {
    fn code(&self) -> u16 {
        match self {
            N5ChunkMode::Default => 0,
            N5ChunkMode::VarLen { .. } => 1,
            N5ChunkMode::Object => 2,
        }
    }
}

fn read_be<const N: usize>(bytes: &[u8], offset: &mut usize) -> crate::Result<[u8; N]> {
    let end = *offset + N;
    let out = bytes
        .get(*offset..end)
        .ok_or_else(|| {
            crate::Error::general(format!(
                "N5 chunk header truncated at byte {end} of {}",
                bytes.len()
            ))
        })?
        .try_into()
        .map_err(crate::Error::wrap)?;
    *offset = end;
    Ok(out)
}

impl N5ChunkHeader {
    /// Header for a dense block whose zarr-order shape is `zarr_shape`.
    pub(crate) fn dense(zarr_shape: impl DoubleEndedIterator<Item = u32>) -> Self {
        Self {
            mode: N5ChunkMode::Default,
            shape: zarr_shape.rev().collect(),
        }
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> crate::Result<Self> {
        let mut offset: usize = 0;
        let mode_num = u16::from_be_bytes(read_be(bytes, &mut offset)?);
        let ndim = u16::from_be_bytes(read_be(bytes, &mut offset)?);
        let shape = (0..ndim)
            .map(|_| read_be(bytes, &mut offset).map(u32::from_be_bytes))
            .collect::<crate::Result<Vec<_>>>()?;

        let mode = match mode_num {
            0 => N5ChunkMode::Default,
            1 => N5ChunkMode::VarLen {
                num_el: u32::from_be_bytes(read_be(bytes, &mut offset)?),
            },
            2 => N5ChunkMode::Object,
            n => return Err(crate::Error::general(format!("invalid N5 chunk mode {n}"))),
        };
        Ok(N5ChunkHeader { mode, shape })
    }

    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.data_offset());
        out.extend_from_slice(&self.mode.code().to_be_bytes());
        out.extend_from_slice(&(self.shape.len() as u16).to_be_bytes());
        for n in &self.shape {
            out.extend_from_slice(&n.to_be_bytes());
        }
        if let N5ChunkMode::VarLen { num_el } = self.mode {
            out.extend_from_slice(&num_el.to_be_bytes());
        }
        out
    }

    pub(crate) fn data_offset(&self) -> usize {
        size_of::<u16>()  // mode discriminator
            + size_of::<u16>() // ndim
            + self.shape.len() * size_of::<u32>()  // shape
            + match self.mode {
                N5ChunkMode::VarLen { .. } => size_of::<u32>(),
                _ => 0,
            }
    }
}
