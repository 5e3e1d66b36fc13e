/// Grayscale sample grid of the rendered page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raster {
    pub width: u32,
    pub height: u32,
    /// Row-major luminance, `width * height` values
    pub luma: Vec<u8>,
}

impl Raster {
    pub fn new(width: u32, height: u32, luma: Vec<u8>) -> Self {
        Self {
            width,
            height,
            luma,
        }
    }

    fn is_consistent(&self) -> bool {
        self.luma.len() as u64 == u64::from(self.width) * u64::from(self.height)
    }
}

const HASH_WIDTH: u32 = 9;
const HASH_HEIGHT: u32 = 8;

/// Computes a 64-bit difference hash (dHash)
///
/// The raster is box-averaged down to 9x8; each bit records whether a cell is
/// darker than its right neighbour. Returns None when the raster is smaller
/// than 9x8 or its sample count does not match its dimensions.
pub fn difference_hash(raster: &Raster) -> Option<u64> {
    if raster.width < HASH_WIDTH || raster.height < HASH_HEIGHT || !raster.is_consistent() {
        return None;
    }

    let cells = reduce(raster);
    let mut hash = 0u64;
    for row in 0..HASH_HEIGHT as usize {
        for col in 0..(HASH_WIDTH - 1) as usize {
            let left = cells[row * HASH_WIDTH as usize + col];
            let right = cells[row * HASH_WIDTH as usize + col + 1];
            hash <<= 1;
            if left < right {
                hash |= 1;
            }
        }
    }
    Some(hash)
}

fn reduce(raster: &Raster) -> Vec<u32> {
    let mut cells = Vec::with_capacity((HASH_WIDTH * HASH_HEIGHT) as usize);

    for cy in 0..HASH_HEIGHT {
        let y0 = cy * raster.height / HASH_HEIGHT;
        let y1 = ((cy + 1) * raster.height / HASH_HEIGHT).max(y0 + 1);
        for cx in 0..HASH_WIDTH {
            let x0 = cx * raster.width / HASH_WIDTH;
            let x1 = ((cx + 1) * raster.width / HASH_WIDTH).max(x0 + 1);

            let mut sum = 0u32;
            for y in y0..y1 {
                let row = (y * raster.width) as usize;
                for x in x0..x1 {
                    sum += u32::from(raster.luma[row + x as usize]);
                }
            }
            cells.push(sum / ((y1 - y0) * (x1 - x0)));
        }
    }

    cells
}
