//! Extended geometry types.
//!
//! When a connection is opened with `extended_types` enabled, the pool's
//! init hook registers these scalar functions on every new session. Points
//! are stored as WKT text (`POINT(x y)`).
//!
//! | Function | Result |
//! |----------|--------|
//! | `st_point(x, y)` | WKT text |
//! | `st_x(p)`, `st_y(p)` | coordinate |
//! | `st_distance(a, b)` | planar distance |

use std::fmt;

use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::Connection;

/// A planar point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Parse `POINT(x y)`, case-insensitive on the tag.
    pub fn from_wkt(wkt: &str) -> Option<Self> {
        let wkt = wkt.trim();
        let tag = wkt.get(..5)?;
        if !tag.eq_ignore_ascii_case("POINT") {
            return None;
        }
        let body = wkt[5..].trim().strip_prefix('(')?.strip_suffix(')')?;
        let mut coords = body.split_whitespace().map(str::parse::<f64>);
        let x = coords.next()?.ok()?;
        let y = coords.next()?.ok()?;
        if coords.next().is_some() {
            return None;
        }
        Some(Self { x, y })
    }

    pub fn distance(&self, other: &Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "POINT({} {})", self.x, self.y)
    }
}

fn point_arg(ctx: &Context<'_>, idx: usize) -> rusqlite::Result<Option<Point>> {
    let Some(wkt) = ctx.get::<Option<String>>(idx)? else {
        return Ok(None);
    };
    Point::from_wkt(&wkt)
        .map(Some)
        .ok_or_else(|| rusqlite::Error::UserFunctionError(format!("invalid point: {wkt}").into()))
}

/// Register the geometry functions on `conn`.
pub fn register(conn: &Connection) -> rusqlite::Result<()> {
    let flags = FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC;

    conn.create_scalar_function("st_point", 2, flags, |ctx| {
        let x = ctx.get::<Option<f64>>(0)?;
        let y = ctx.get::<Option<f64>>(1)?;
        Ok(x.zip(y).map(|(x, y)| Point::new(x, y).to_string()))
    })?;

    conn.create_scalar_function("st_x", 1, flags, |ctx| {
        Ok(point_arg(ctx, 0)?.map(|p| p.x))
    })?;

    conn.create_scalar_function("st_y", 1, flags, |ctx| {
        Ok(point_arg(ctx, 0)?.map(|p| p.y))
    })?;

    conn.create_scalar_function("st_distance", 2, flags, |ctx| {
        let a = point_arg(ctx, 0)?;
        let b = point_arg(ctx, 1)?;
        Ok(a.zip(b).map(|(a, b)| a.distance(&b)))
    })?;

    Ok(())
}
