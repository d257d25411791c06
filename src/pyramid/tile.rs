use crate::index::{decode, shr32, tile_key_range, tile_of, MAX_ZOOM};

#[derive(Debug, Clone)]
pub struct Tile {
    zoom: u8,
    x: u32,
    y: u32,
    detail: u8,
    cells: Vec<i64>,
    touched: Vec<u32>,
}

impl Tile {
    pub fn new(detail: u8) -> Self {
        let side = 1usize << detail;
        Self {
            zoom: 0,
            x: 0,
            y: 0,
            detail,
            cells: vec![0; side * side],
            touched: Vec::new(),
        }
    }

    pub fn zoom(&self) -> u8 {
        self.zoom
    }

    pub fn x(&self) -> u32 {
        self.x
    }

    pub fn y(&self) -> u32 {
        self.y
    }

    pub fn detail(&self) -> u8 {
        self.detail
    }

    pub fn side(&self) -> u32 {
        1 << self.detail
    }

    pub fn id(&self) -> u64 {
        tile_key_range(self.zoom, self.x, self.y).0
    }

    pub fn key_range(&self) -> (u64, u64) {
        tile_key_range(self.zoom, self.x, self.y)
    }

    pub fn is_empty(&self) -> bool {
        self.touched.is_empty()
    }

    pub fn reset(&mut self, zoom: u8, key: u64) {
        for &cell in &self.touched {
            self.cells[cell as usize] = 0;
        }
        self.touched.clear();
        let (x, y) = tile_of(key, zoom);
        self.zoom = zoom;
        self.x = x;
        self.y = y;
    }

    pub fn cell_of(&self, key: u64) -> u32 {
        let (x, y) = decode(key);
        let shift = (MAX_ZOOM - self.zoom - self.detail) as u32;
        let mask = self.side() - 1;
        let cx = shr32(x, shift) & mask;
        let cy = shr32(y, shift) & mask;
        cy * self.side() + cx
    }

    pub fn add_cell(&mut self, cell: u32, count: i64) {
        if count == 0 {
            return;
        }
        let slot = &mut self.cells[cell as usize];
        if *slot == 0 {
            self.touched.push(cell);
        }
        *slot += count;
    }

    pub fn add(&mut self, key: u64, count: i64) {
        let cell = self.cell_of(key);
        self.add_cell(cell, count);
    }

    pub fn count(&self, cell: u32) -> i64 {
        self.cells[cell as usize]
    }

    pub fn occupied(&self) -> Vec<(u32, i64)> {
        let mut cells = self
            .touched
            .iter()
            .map(|&cell| (cell, self.cells[cell as usize]))
            .filter(|&(_, count)| count != 0)
            .collect::<Vec<_>>();
        cells.sort_unstable_by_key(|&(cell, _)| cell);
        cells.dedup_by_key(|&mut (cell, _)| cell);
        cells
    }

    pub fn absorb(&mut self, cells: &[(u32, i64)]) {
        for &(cell, count) in cells {
            self.add_cell(cell, count);
        }
    }

    pub fn total(&self) -> i64 {
        self.occupied().iter().map(|&(_, count)| count).sum()
    }

    pub fn cell_origin(&self, cell: u32) -> (u32, u32, u64) {
        let size_bits = (MAX_ZOOM - self.zoom - self.detail) as u32;
        let tile_bits = (MAX_ZOOM - self.zoom) as u32;
        let cx = cell % self.side();
        let cy = cell / self.side();
        let x = (self.x as u64) << tile_bits | (cx as u64) << size_bits;
        let y = (self.y as u64) << tile_bits | (cy as u64) << size_bits;
        (x as u32, y as u32, 1u64 << size_bits)
    }
}
