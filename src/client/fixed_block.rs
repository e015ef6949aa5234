//! Block size adaptation between the stream and a data callback
//!
//! The stream moves data one burst at a time while the application may ask
//! for a different, fixed number of frames per callback. The adapter keeps
//! the leftover frames between calls so the callback always sees exactly its
//! block size.

use crate::stream::Sample;

use super::callback::CallbackResult;

/// Byte buffer aligned for any supported sample type
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    words: Vec<u64>,
    len: usize,
}

impl FrameBuffer {
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0u64; (len + 7) / 8],
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &bytemuck::cast_slice(&self.words)[..self.len]
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut(&mut self.words)[..self.len]
    }
}

/// View frame bytes as samples. `None` when the slice is misaligned or not a
/// whole number of samples.
pub fn samples_mut<S: Sample>(bytes: &mut [u8]) -> Option<&mut [S]> {
    bytemuck::try_cast_slice_mut(bytes).ok()
}

/// Accumulates or splits frames into fixed-size callback blocks
#[derive(Debug)]
pub struct FixedBlockAdapter {
    bytes_per_frame: usize,
    block_frames: usize,
    storage: FrameBuffer,
    position: usize,
    valid: usize,
}

impl FixedBlockAdapter {
    pub fn new(bytes_per_frame: usize, block_frames: usize) -> Self {
        let block_frames = block_frames.max(1);
        Self {
            bytes_per_frame,
            block_frames,
            storage: FrameBuffer::new(block_frames * bytes_per_frame),
            position: 0,
            valid: 0,
        }
    }

    pub fn block_frames(&self) -> usize {
        self.block_frames
    }

    fn block_bytes(&self) -> usize {
        self.block_frames * self.bytes_per_frame
    }

    /// Fill all of `output`, calling `produce` for whole blocks as needed.
    /// Frames produced beyond `output` are kept for the next call.
    pub fn pull<F>(&mut self, output: &mut [u8], mut produce: F) -> CallbackResult
    where
        F: FnMut(&mut [u8], usize) -> CallbackResult,
    {
        let block_bytes = self.block_bytes();
        let mut filled = 0;
        while filled < output.len() {
            if self.position < self.valid {
                let n = (self.valid - self.position).min(output.len() - filled);
                output[filled..filled + n].copy_from_slice(&self.storage.as_bytes()[self.position..self.position + n]);
                self.position += n;
                filled += n;
            } else if output.len() - filled >= block_bytes {
                let result = produce(&mut output[filled..filled + block_bytes], self.block_frames);
                filled += block_bytes;
                if result == CallbackResult::Stop {
                    return result;
                }
            } else {
                let result = produce(&mut self.storage.as_bytes_mut()[..block_bytes], self.block_frames);
                self.position = 0;
                self.valid = block_bytes;
                if result == CallbackResult::Stop {
                    return result;
                }
            }
        }
        CallbackResult::Continue
    }

    /// Feed `input` through, calling `consume` once per complete block.
    /// A partial block waits for the next call.
    pub fn push<F>(&mut self, input: &[u8], mut consume: F) -> CallbackResult
    where
        F: FnMut(&mut [u8], usize) -> CallbackResult,
    {
        let block_bytes = self.block_bytes();
        let mut offset = 0;
        while offset < input.len() {
            let n = (block_bytes - self.valid).min(input.len() - offset);
            self.storage.as_bytes_mut()[self.valid..self.valid + n].copy_from_slice(&input[offset..offset + n]);
            self.valid += n;
            offset += n;

            if self.valid == block_bytes {
                self.valid = 0;
                if consume(self.storage.as_bytes_mut(), self.block_frames) == CallbackResult::Stop {
                    return CallbackResult::Stop;
                }
            }
        }
        CallbackResult::Continue
    }
}
