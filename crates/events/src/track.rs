//! Track identification from the car's path.
//!
//! During a session the bounding box of every visited position is grown.
//! From lap 2 on, each frame-to-frame segment is tested against the known
//! start lines; a crossing in the right direction is scored by the IoU of
//! the visited box with the track's box.

use std::io::Read;
use std::path::Path;

use gt7_model::Snapshot;
use serde::{Deserialize, Serialize};

/// Minimum score (percent, one decimal) to accept the best candidate.
pub const PROBABILITY_THRESHOLD: f64 = 95.0;
const ALLOWED_IOU_DEVIATION: f64 = 0.02;
const MAX_MATCHES: usize = 3;

#[derive(Debug, thiserror::Error)]
pub enum TrackError {
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    #[serde(rename = "PX")]
    PosX,
    #[serde(rename = "NX")]
    NegX,
    #[serde(rename = "PY")]
    PosY,
    #[serde(rename = "NY")]
    NegY,
    #[serde(rename = "--")]
    Still,
}

impl Direction {
    fn of(dx: f64, dy: f64) -> Self {
        if dx > 0.0 {
            Direction::PosX
        } else if dx < 0.0 {
            Direction::NegX
        } else if dy > 0.0 {
            Direction::PosY
        } else if dy < 0.0 {
            Direction::NegY
        } else {
            Direction::Still
        }
    }
}

/// One row of the bounds database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub struct TrackBounds {
    pub track: i32,
    pub minx: f64,
    pub miny: f64,
    pub maxx: f64,
    pub maxy: f64,
    pub p1x: f64,
    pub p1y: f64,
    pub p2x: f64,
    pub p2y: f64,
    pub direction: Direction,
}

pub fn load_bounds(path: &Path) -> Result<Vec<TrackBounds>, TrackError> {
    let mut rdr = csv::Reader::from_path(path)?;
    collect(&mut rdr)
}

pub fn read_bounds<R: Read>(reader: R) -> Result<Vec<TrackBounds>, TrackError> {
    let mut rdr = csv::Reader::from_reader(reader);
    collect(&mut rdr)
}

fn collect<R: Read>(rdr: &mut csv::Reader<R>) -> Result<Vec<TrackBounds>, TrackError> {
    let mut bounds = Vec::new();
    for rec in rdr.deserialize() {
        bounds.push(rec?);
    }
    Ok(bounds)
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct BBox {
    minx: f64,
    miny: f64,
    maxx: f64,
    maxy: f64,
}

impl BBox {
    const EMPTY: BBox = BBox {
        minx: f64::MAX,
        miny: f64::MAX,
        maxx: f64::MIN,
        maxy: f64::MIN,
    };

    fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        BBox {
            minx: x1.min(x2),
            miny: y1.min(y2),
            maxx: x1.max(x2),
            maxy: y1.max(y2),
        }
    }

    fn grow(&mut self, x: f64, y: f64) {
        self.minx = self.minx.min(x);
        self.miny = self.miny.min(y);
        self.maxx = self.maxx.max(x);
        self.maxy = self.maxy.max(y);
    }

    fn area(&self) -> f64 {
        (self.maxx - self.minx) * (self.maxy - self.miny)
    }

    fn intersection(&self, other: &BBox) -> Option<BBox> {
        let b = BBox {
            minx: self.minx.max(other.minx),
            miny: self.miny.max(other.miny),
            maxx: self.maxx.min(other.maxx),
            maxy: self.maxy.min(other.maxy),
        };
        (b.minx <= b.maxx && b.miny <= b.maxy).then_some(b)
    }

    fn iou(&self, other: &BBox) -> f64 {
        let inter = self.intersection(other).map_or(0.0, |b| b.area());
        let union = self.area() + other.area() - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }
}

type Point = (f64, f64);

/// Whether segment `a` (start line) and `b` (car movement) cross, and the
/// direction of `b`.
fn crossing(a: (Point, Point), b: (Point, Point)) -> Option<Direction> {
    let ((p0x, p0y), (p1x, p1y)) = a;
    let ((p2x, p2y), (p3x, p3y)) = b;
    let (s1x, s1y) = (p1x - p0x, p1y - p0y);
    let (s2x, s2y) = (p3x - p2x, p3y - p2y);

    let denominator = -s2x * s1y + s1x * s2y;
    if denominator == 0.0 {
        return None;
    }
    let s = (-s1y * (p0x - p2x) + s1x * (p0y - p2y)) / denominator;
    let t = (s2x * (p0y - p2y) - s2y * (p0x - p2x)) / denominator;
    ((0.0..=1.0).contains(&s) && (0.0..=1.0).contains(&t)).then(|| Direction::of(s2x, s2y))
}

/// Candidates for a movement `from -> to` given the visited box, best first.
pub fn find_matching_tracks(
    from: Point,
    to: Point,
    visited: (Point, Point),
    bounds: &[TrackBounds],
) -> Vec<(f64, i32)> {
    let outer = BBox::new(visited.0 .0, visited.0 .1, visited.1 .0, visited.1 .1);
    let mut matches: Vec<(f64, i32)> = bounds
        .iter()
        .filter(|tb| {
            crossing(((tb.p1x, tb.p1y), (tb.p2x, tb.p2y)), (from, to)) == Some(tb.direction)
        })
        .map(|tb| {
            let inner = BBox::new(tb.minx, tb.miny, tb.maxx, tb.maxy);
            (outer.iou(&inner), tb.track)
        })
        .collect();
    matches.sort_by(|a, b| b.0.total_cmp(&a.0));

    let Some(&(best, _)) = matches.first() else {
        return matches;
    };
    let threshold = best * (1.0 - ALLOWED_IOU_DEVIATION);
    matches.retain(|m| m.0 >= threshold);
    matches.truncate(MAX_MATCHES);
    matches
}

pub struct TrackDetector {
    bounds: Vec<TrackBounds>,
    track_id: Option<i32>,
    last_xz: Option<Point>,
    visited: BBox,
}

impl TrackDetector {
    pub fn new(bounds: Vec<TrackBounds>) -> Self {
        Self {
            bounds,
            track_id: None,
            last_xz: None,
            visited: BBox::EMPTY,
        }
    }

    pub fn from_csv(path: &Path) -> Result<Self, TrackError> {
        Ok(Self::new(load_bounds(path)?))
    }

    pub fn track_id(&self) -> Option<i32> {
        self.track_id
    }

    /// Feeds one frame and returns the current guess.
    pub fn detect(&mut self, s: &Snapshot) -> Option<i32> {
        if s.is_loading() || s.is_paused() {
            return self.track_id;
        }
        if self.track_id.is_some() && s.cars_on_track() {
            return self.track_id;
        }
        self.track_id = self.step(s);
        self.track_id
    }

    fn step(&mut self, s: &Snapshot) -> Option<i32> {
        if !s.cars_on_track() {
            self.last_xz = None;
            self.visited = BBox::EMPTY;
            return None;
        }

        let xz = (f64::from(s.position.x), f64::from(s.position.z));
        self.visited.grow(xz.0, xz.1);

        let mut found = None;
        if let (Some(lap), Some(last)) = (s.current_lap, self.last_xz) {
            if lap > 1 {
                let visited = (
                    (self.visited.minx, self.visited.miny),
                    (self.visited.maxx, self.visited.maxy),
                );
                if let Some(&(iou, track)) =
                    find_matching_tracks(last, xz, visited, &self.bounds).first()
                {
                    let probability = (iou * 1000.0).round() / 10.0;
                    if probability >= PROBABILITY_THRESHOLD {
                        found = Some(track);
                    }
                }
            }
        }
        self.last_xz = Some(xz);
        found
    }
}
