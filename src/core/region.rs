//! Region geometries used for spatial reduction
//!
//! A region is a clicked point, a polygon (catchment, uploaded asset or
//! user drawing) or a corridor: a road section buffered by a distance.
//! Coordinates are projected metres in the analysis grid's CRS.

use crate::types::{BoundingBox, GeoTransform, ValidityMask, WqError, WqResult};
use geo::{
    Area, BoundingRect, Contains, Coord, EuclideanDistance, EuclideanLength, LineString, Point,
    Polygon,
};
use ndarray::Array2;

/// Road or river centreline
#[derive(Debug, Clone, PartialEq)]
pub struct Polyline(pub LineString<f64>);

impl Polyline {
    pub fn new(vertices: &[(f64, f64)]) -> WqResult<Self> {
        if vertices.len() < 2 {
            return Err(WqError::InvalidRegion(format!(
                "a polyline needs at least 2 vertices, got {}",
                vertices.len()
            )));
        }
        Ok(Self(LineString::from(vertices.to_vec())))
    }

    pub fn length(&self) -> f64 {
        self.0.euclidean_length()
    }

    /// Cut into consecutive sections of `section_length`, numbered from the start
    ///
    /// The last section carries whatever length remains.
    pub fn cut_sections(&self, section_length: f64) -> WqResult<Vec<Polyline>> {
        if !(section_length > 0.0) || !section_length.is_finite() {
            return Err(WqError::InvalidParameter(format!(
                "section length must be positive, got {}",
                section_length
            )));
        }
        const EPS: f64 = 1e-9;

        let mut sections = Vec::new();
        let mut current: Vec<Coord<f64>> = match self.0.coords().next() {
            Some(c) => vec![*c],
            None => return Ok(sections),
        };
        let mut remaining = section_length;

        for segment in self.0.lines() {
            let end = segment.end;
            let mut start = segment.start;
            let mut seg_len = segment.euclidean_length();

            while seg_len >= remaining - EPS && seg_len > EPS {
                let t = remaining / seg_len;
                let cut = Coord {
                    x: start.x + (end.x - start.x) * t.min(1.0),
                    y: start.y + (end.y - start.y) * t.min(1.0),
                };
                current.push(cut);
                sections.push(Polyline(LineString::new(std::mem::replace(&mut current, vec![cut]))));
                start = cut;
                seg_len = (seg_len - remaining).max(0.0);
                remaining = section_length;
            }

            if seg_len > EPS {
                current.push(end);
                remaining -= seg_len;
            }
        }

        if current.len() > 1 {
            sections.push(Polyline(LineString::new(current)));
        }
        Ok(sections)
    }
}

/// Geometry a raster is reduced over
#[derive(Debug, Clone, PartialEq)]
pub enum Region {
    Point(Point<f64>),
    Polygon(Polygon<f64>),
    Corridor { line: LineString<f64>, half_width: f64 },
}

impl Region {
    pub fn point(x: f64, y: f64) -> Self {
        Region::Point(Point::new(x, y))
    }

    /// Polygon from its outer ring; the ring is closed if needed
    pub fn polygon(vertices: &[(f64, f64)]) -> WqResult<Self> {
        let region = Region::Polygon(Polygon::new(LineString::from(vertices.to_vec()), vec![]));
        region.validate()?;
        Ok(region)
    }

    /// Buffered road section
    pub fn corridor(line: &Polyline, half_width: f64) -> WqResult<Self> {
        let region = Region::Corridor {
            line: line.0.clone(),
            half_width,
        };
        region.validate()?;
        Ok(region)
    }

    pub fn validate(&self) -> WqResult<()> {
        match self {
            Region::Point(p) => {
                if !(p.x().is_finite() && p.y().is_finite()) {
                    return Err(WqError::InvalidRegion("non-finite point".to_string()));
                }
            }
            Region::Polygon(poly) => {
                if poly.exterior().0.len() < 4 || !(poly.unsigned_area() > 0.0) {
                    return Err(WqError::InvalidRegion(
                        "polygon needs at least 3 vertices and a non-zero area".to_string(),
                    ));
                }
            }
            Region::Corridor { line, half_width } => {
                if line.0.len() < 2 {
                    return Err(WqError::InvalidRegion("corridor needs a line".to_string()));
                }
                if !(*half_width > 0.0) || !half_width.is_finite() {
                    return Err(WqError::InvalidRegion(format!(
                        "corridor half-width must be positive, got {}",
                        half_width
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        let p = Point::new(x, y);
        match self {
            Region::Point(q) => *q == p,
            Region::Polygon(poly) => poly.contains(&p),
            Region::Corridor { line, half_width } => p.euclidean_distance(line) <= *half_width,
        }
    }

    pub fn bounding_box(&self) -> BoundingBox {
        let (rect, pad) = match self {
            Region::Point(p) => {
                return BoundingBox { min_x: p.x(), max_x: p.x(), min_y: p.y(), max_y: p.y() }
            }
            Region::Polygon(poly) => (poly.bounding_rect(), 0.0),
            Region::Corridor { line, half_width } => (line.bounding_rect(), *half_width),
        };
        match rect {
            Some(r) => BoundingBox {
                min_x: r.min().x - pad,
                max_x: r.max().x + pad,
                min_y: r.min().y - pad,
                max_y: r.max().y + pad,
            },
            None => BoundingBox { min_x: f64::NAN, max_x: f64::NAN, min_y: f64::NAN, max_y: f64::NAN },
        }
    }

    /// Grid cells hit by sample points `scale` metres apart inside the region
    ///
    /// A point samples the pixel under it. Regions too small to catch a
    /// sample point fall back to the pixels whose centres they contain.
    /// Cells may repeat when `scale` is finer than the grid.
    pub fn sample_cells(&self, transform: &GeoTransform, dims: (usize, usize), scale: f64) -> Vec<(usize, usize)> {
        if let Region::Point(p) = self {
            return transform.world_to_pixel(p.x(), p.y(), dims).into_iter().collect();
        }

        let scale = if scale > 0.0 { scale } else { transform.pixel_size() };
        let bbox = self.bounding_box();
        let nx = ((bbox.max_x - bbox.min_x) / scale).ceil().max(1.0) as usize;
        let ny = ((bbox.max_y - bbox.min_y) / scale).ceil().max(1.0) as usize;

        let mut cells = Vec::new();
        for j in 0..ny {
            let y = bbox.max_y - (j as f64 + 0.5) * scale;
            for i in 0..nx {
                let x = bbox.min_x + (i as f64 + 0.5) * scale;
                if self.contains(x, y) {
                    if let Some(cell) = transform.world_to_pixel(x, y, dims) {
                        cells.push(cell);
                    }
                }
            }
        }

        if cells.is_empty() {
            let mask = self.mask_for_grid(transform, dims);
            cells = mask
                .indexed_iter()
                .filter(|(_, &inside)| inside)
                .map(|(cell, _)| cell)
                .collect();
        }
        cells
    }

    /// Pixels of a grid that belong to the region
    pub fn mask_for_grid(&self, transform: &GeoTransform, dims: (usize, usize)) -> ValidityMask {
        if let Region::Point(p) = self {
            let mut mask = Array2::from_elem(dims, false);
            if let Some(cell) = transform.world_to_pixel(p.x(), p.y(), dims) {
                mask[cell] = true;
            }
            return mask;
        }

        Array2::from_shape_fn(dims, |(r, c)| {
            let (x, y) = transform.pixel_center(r, c);
            self.contains(x, y)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(size: f64) -> Region {
        Region::polygon(&[(0.0, 0.0), (size, 0.0), (size, size), (0.0, size)]).unwrap()
    }

    #[test]
    fn test_polygon_validation() {
        assert!(Region::polygon(&[(0.0, 0.0), (1.0, 1.0)]).is_err());
        assert!(Region::polygon(&[(0.0, 0.0), (1.0, 1.0), (2.0, 2.0)]).is_err());
        let region = square(10.0);
        assert!(region.contains(5.0, 5.0));
        assert!(!region.contains(15.0, 5.0));
    }

    #[test]
    fn test_cut_sections() {
        let line = Polyline::new(&[(0.0, 0.0), (250.0, 0.0), (250.0, 100.0)]).unwrap();
        assert_eq!(line.length(), 350.0);

        let sections = line.cut_sections(100.0).unwrap();
        assert_eq!(sections.len(), 4);
        for section in &sections[..3] {
            assert!((section.length() - 100.0).abs() < 1e-9);
        }
        assert!((sections[3].length() - 50.0).abs() < 1e-9);
        // Third section turns the corner
        assert_eq!(sections[2].0.0.len(), 3);

        let exact = Polyline::new(&[(0.0, 0.0), (200.0, 0.0)]).unwrap();
        assert_eq!(exact.cut_sections(100.0).unwrap().len(), 2);
        assert!(line.cut_sections(0.0).is_err());
    }

    #[test]
    fn test_corridor_contains_and_bounds() {
        let line = Polyline::new(&[(0.0, 0.0), (100.0, 0.0)]).unwrap();
        let corridor = Region::corridor(&line, 20.0).unwrap();
        assert!(corridor.contains(50.0, 19.0));
        assert!(!corridor.contains(50.0, 21.0));
        assert!(corridor.contains(-10.0, 0.0));

        let bbox = corridor.bounding_box();
        assert_eq!((bbox.min_x, bbox.max_x, bbox.min_y, bbox.max_y), (-20.0, 120.0, -20.0, 20.0));
        assert!(Region::corridor(&line, 0.0).is_err());
    }

    #[test]
    fn test_sample_cells() {
        let transform = GeoTransform::north_up(0.0, 40.0, 10.0);
        let region = Region::polygon(&[(0.0, 0.0), (40.0, 0.0), (40.0, 40.0), (0.0, 40.0)]).unwrap();

        let cells = region.sample_cells(&transform, (4, 4), 10.0);
        assert_eq!(cells.len(), 16);
        let coarse = region.sample_cells(&transform, (4, 4), 20.0);
        // Samples at x = 10, 30 and y = 30, 10 land on pixel edges, which floor onto the next cell
        assert_eq!(coarse, vec![(1, 1), (1, 3), (3, 1), (3, 3)]);

        let point = Region::point(15.0, 38.0);
        assert_eq!(point.sample_cells(&transform, (4, 4), 30.0), vec![(0, 1)]);
        assert!(Region::point(100.0, 0.0).sample_cells(&transform, (4, 4), 30.0).is_empty());

        // Too small for a 30 m sample grid, still catches one pixel centre
        let tiny = Region::polygon(&[(12.0, 12.0), (18.0, 12.0), (18.0, 18.0), (12.0, 18.0)]).unwrap();
        assert_eq!(tiny.sample_cells(&transform, (4, 4), 30.0), vec![(2, 1)]);
    }
}
