use std::fmt;

use serde::Serialize;

use crate::error::BdsError;
use crate::storage::{NodePath, Storage};

pub const ROWS: &str = "rows";
pub const COLUMNS: &str = "columns";

/// A rows × columns rectangle. Both dimensions are strictly positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Geometry {
    rows: u32,
    columns: u32,
}

impl Geometry {
    pub fn new(rows: u32, columns: u32) -> Result<Self, BdsError> {
        if rows == 0 || columns == 0 {
            return Err(BdsError::IllegalArgument(format!(
                "geometry dimensions must be positive: {rows}x{columns}"
            )));
        }
        Ok(Self { rows, columns })
    }

    /// Parses the `"{rows}x{columns}"` form. Anything else is simply not a
    /// geometry string.
    pub fn parse(value: &str) -> Option<Self> {
        let (rows, columns) = value.trim().split_once('x')?;
        let rows = rows.trim().parse().ok()?;
        let columns = columns.trim().parse().ok()?;
        Self::new(rows, columns).ok()
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn columns(&self) -> u32 {
        self.columns
    }

    /// Number of cells; `u64` so that any pair of `u32` dimensions fits.
    pub fn dimension(&self) -> u64 {
        u64::from(self.rows) * u64::from(self.columns)
    }

    pub fn contains(&self, location: &Location) -> bool {
        location.x <= self.columns && location.y <= self.rows
    }

    pub fn save_to(&self, storage: &Storage, dir: &NodePath, name: &str) -> Result<(), BdsError> {
        let node = storage.make_directory(dir, name)?;
        storage.add_key_value_pair(node.path(), ROWS, &self.rows.to_string())?;
        storage.add_key_value_pair(node.path(), COLUMNS, &self.columns.to_string())?;
        Ok(())
    }

    pub fn load_from(storage: &Storage, dir: &NodePath) -> Result<Self, BdsError> {
        let rows = parse_dimension(storage, dir, ROWS)?;
        let columns = parse_dimension(storage, dir, COLUMNS)?;
        Self::new(rows, columns)
            .map_err(|_| BdsError::DataStructure(format!("invalid geometry stored in {dir}")))
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.rows, self.columns)
    }
}

fn parse_dimension(storage: &Storage, dir: &NodePath, key: &str) -> Result<u32, BdsError> {
    let value = storage.get_value(dir, key)?;
    value.trim().parse().map_err(|_| BdsError::InvalidParameter {
        name: dir.join(key).to_string(),
        value,
    })
}

/// A geometry bound to a fixed directory name, so that two same-shaped
/// geometries with different roles stay apart on disk.
pub trait NamedGeometry: Sized {
    const DIRECTORY: &'static str;

    fn from_geometry(geometry: Geometry) -> Self;

    fn geometry(&self) -> &Geometry;

    fn save_to(&self, storage: &Storage, dir: &NodePath) -> Result<(), BdsError> {
        self.geometry().save_to(storage, dir, Self::DIRECTORY)
    }

    fn load_from(storage: &Storage, dir: &NodePath) -> Result<Self, BdsError> {
        Geometry::load_from(storage, &dir.join(Self::DIRECTORY)).map(Self::from_geometry)
    }
}

/// Arrangement of wells on a plate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct PlateGeometry(Geometry);

impl PlateGeometry {
    pub fn new(rows: u32, columns: u32) -> Result<Self, BdsError> {
        Geometry::new(rows, columns).map(Self)
    }
}

impl NamedGeometry for PlateGeometry {
    const DIRECTORY: &'static str = "plate_geometry";

    fn from_geometry(geometry: Geometry) -> Self {
        Self(geometry)
    }

    fn geometry(&self) -> &Geometry {
        &self.0
    }
}

impl std::ops::Deref for PlateGeometry {
    type Target = Geometry;

    fn deref(&self) -> &Geometry {
        &self.0
    }
}

impl fmt::Display for PlateGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Arrangement of tiles (fields of view) inside one well.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct WellGeometry(Geometry);

impl WellGeometry {
    pub fn new(rows: u32, columns: u32) -> Result<Self, BdsError> {
        Geometry::new(rows, columns).map(Self)
    }
}

impl NamedGeometry for WellGeometry {
    const DIRECTORY: &'static str = "well_geometry";

    fn from_geometry(geometry: Geometry) -> Self {
        Self(geometry)
    }

    fn geometry(&self) -> &Geometry {
        &self.0
    }
}

impl std::ops::Deref for WellGeometry {
    type Target = Geometry;

    fn deref(&self) -> &Geometry {
        &self.0
    }
}

impl fmt::Display for WellGeometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// 1-based coordinate: `x` is the column, `y` the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Location {
    x: u32,
    y: u32,
}

impl Location {
    pub fn new(x: u32, y: u32) -> Result<Self, BdsError> {
        if x == 0 || y == 0 {
            return Err(BdsError::IllegalArgument(format!(
                "location coordinates are 1-based: x={x}, y={y}"
            )));
        }
        Ok(Self { x, y })
    }

    /// Row-major, 1-based linear position inside `geometry`. Positions must
    /// satisfy `0 < position < rows * columns`; the last cell is excluded.
    pub fn from_position(position: u32, geometry: &Geometry) -> Result<Self, BdsError> {
        if position == 0 || u64::from(position) >= geometry.dimension() {
            return Err(BdsError::IllegalArgument(format!(
                "position {position} is outside of 0 < position < {} for geometry {geometry}",
                geometry.dimension()
            )));
        }
        let columns = geometry.columns();
        let modulo = position % columns;
        let x = if modulo == 0 { columns } else { modulo };
        let y = position.div_ceil(columns);
        Ok(Self { x, y })
    }

    /// Parses spreadsheet coordinates such as `"B3"` (row B, column 3).
    /// Only single-letter rows are supported.
    pub fn from_matrix_coordinate(coordinate: &str) -> Option<Self> {
        let lowered = coordinate.trim().to_ascii_lowercase();
        let mut chars = lowered.chars();
        let letter = chars.next()?;
        if !letter.is_ascii_lowercase() {
            return None;
        }
        let digits = chars.as_str();
        if digits.is_empty() || !digits.chars().all(|ch| ch.is_ascii_digit()) {
            return None;
        }
        let x = digits.parse().ok()?;
        let y = letter as u32 - 'a' as u32 + 1;
        Self::new(x, y).ok()
    }

    pub fn x(&self) -> u32 {
        self.x
    }

    pub fn y(&self) -> u32 {
        self.y
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[x={},y={}]", self.x, self.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_string_round_trip() {
        for (rows, columns) in [(1, 1), (8, 12), (16, 24), (3, 7)] {
            let geometry = Geometry::new(rows, columns).unwrap();
            assert_eq!(Geometry::parse(&geometry.to_string()), Some(geometry));
        }
    }

    #[test]
    fn geometry_rejects_zero_dimensions() {
        assert!(Geometry::new(0, 3).is_err());
        assert!(Geometry::new(3, 0).is_err());
        assert!(Geometry::new(0, 0).is_err());
    }

    #[test]
    fn geometry_parse_failures_are_none() {
        assert_eq!(Geometry::parse("8by12"), None);
        assert_eq!(Geometry::parse("0x12"), None);
        assert_eq!(Geometry::parse("x"), None);
        assert_eq!(Geometry::parse(""), None);
    }

    #[test]
    fn geometry_contains() {
        let geometry = Geometry::new(3, 4).unwrap();
        assert!(geometry.contains(&Location::new(4, 3).unwrap()));
        assert!(geometry.contains(&Location::new(1, 1).unwrap()));
        assert!(!geometry.contains(&Location::new(5, 1).unwrap()));
        assert!(!geometry.contains(&Location::new(1, 4).unwrap()));
    }

    #[test]
    fn location_from_position() {
        let geometry = Geometry::new(3, 4).unwrap();
        assert_eq!(
            Location::from_position(5, &geometry).unwrap(),
            Location::new(1, 2).unwrap()
        );
        assert_eq!(
            Location::from_position(4, &geometry).unwrap(),
            Location::new(4, 1).unwrap()
        );
        assert_eq!(
            Location::from_position(11, &geometry).unwrap(),
            Location::new(3, 3).unwrap()
        );
    }

    #[test]
    fn location_from_position_excludes_last_cell() {
        let geometry = Geometry::new(3, 4).unwrap();
        assert!(Location::from_position(0, &geometry).is_err());
        assert!(Location::from_position(12, &geometry).is_err());
    }

    #[test]
    fn large_geometries_do_not_overflow() {
        let geometry = Geometry::parse("70000x70000").unwrap();
        assert_eq!(geometry.dimension(), 4_900_000_000);
        assert_eq!(
            Location::from_position(5, &geometry).unwrap(),
            Location::new(5, 1).unwrap()
        );
        assert_eq!(
            Location::from_position(u32::MAX, &geometry).unwrap(),
            Location::new(u32::MAX % 70000, u32::MAX.div_ceil(70000)).unwrap()
        );
    }

    #[test]
    fn location_from_matrix_coordinate() {
        assert_eq!(
            Location::from_matrix_coordinate("A1"),
            Some(Location::new(1, 1).unwrap())
        );
        assert_eq!(
            Location::from_matrix_coordinate("c12"),
            Some(Location::new(12, 3).unwrap())
        );
        assert_eq!(
            Location::from_matrix_coordinate("H03"),
            Some(Location::new(3, 8).unwrap())
        );
        assert_eq!(Location::from_matrix_coordinate("AA1"), None);
        assert_eq!(Location::from_matrix_coordinate("A"), None);
        assert_eq!(Location::from_matrix_coordinate("1A"), None);
        assert_eq!(Location::from_matrix_coordinate("A0"), None);
    }

    #[test]
    fn named_geometries_keep_their_role() {
        let plate = PlateGeometry::new(8, 12).unwrap();
        let well = WellGeometry::new(8, 12).unwrap();
        assert_eq!(plate.geometry(), well.geometry());
        assert_ne!(PlateGeometry::DIRECTORY, WellGeometry::DIRECTORY);
    }
}
