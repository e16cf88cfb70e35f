//! Aggregations over the tour collection: rating statistics, the monthly
//! start plan and geospatial lookups around a point.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{json, Value};
use time::{macros::format_description, Date, Month};

use crate::error::{AppError, AppResult};

pub const STATS_MIN_RATING: f64 = 4.5;
pub const PLAN_LIMIT: usize = 12;

const EARTH_RADIUS_MI: f64 = 3963.2;
const EARTH_RADIUS_KM: f64 = 6378.1;
const METERS_TO_MILES: f64 = 0.000621371;
const METERS_TO_KM: f64 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Miles,
    Kilometers,
}

impl Unit {
    /// Anything but `mi` is kilometers.
    pub fn parse(raw: &str) -> Self {
        if raw == "mi" {
            Unit::Miles
        } else {
            Unit::Kilometers
        }
    }

    fn earth_radius(self) -> f64 {
        match self {
            Unit::Miles => EARTH_RADIUS_MI,
            Unit::Kilometers => EARTH_RADIUS_KM,
        }
    }

    fn from_meters(self) -> f64 {
        match self {
            Unit::Miles => METERS_TO_MILES,
            Unit::Kilometers => METERS_TO_KM,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatLng {
    pub lat: f64,
    pub lng: f64,
}

pub fn parse_latlng(raw: &str) -> AppResult<LatLng> {
    let invalid =
        || AppError::BadRequest("Please provide latitude and longitude in the format lat,lng.".into());
    let (lat, lng) = raw.split_once(',').ok_or_else(invalid)?;
    let lat: f64 = lat.trim().parse().map_err(|_| invalid())?;
    let lng: f64 = lng.trim().parse().map_err(|_| invalid())?;
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lng) {
        return Err(invalid());
    }
    Ok(LatLng { lat, lng })
}

/// GeoJSON point `[lng, lat]` of a tour's start location.
fn start_point(tour: &Value) -> Option<LatLng> {
    let coords = tour.pointer("/startLocation/coordinates")?.as_array()?;
    match coords.as_slice() {
        [lng, lat] => Some(LatLng {
            lat: lat.as_f64()?,
            lng: lng.as_f64()?,
        }),
        _ => None,
    }
}

/// Central angle between two points in radians (haversine).
fn central_angle(a: LatLng, b: LatLng) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let dlat = lat2 - lat1;
    let dlng = (b.lng - a.lng).to_radians();
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    2.0 * h.sqrt().min(1.0).asin()
}

/// Tours whose start location lies within `distance` of `center`.
pub fn within(tours: Vec<Value>, center: LatLng, distance: f64, unit: Unit) -> Vec<Value> {
    let radius = distance / unit.earth_radius();
    tours
        .into_iter()
        .filter(|t| start_point(t).map_or(false, |p| central_angle(center, p) <= radius))
        .collect()
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TourDistance {
    pub id: Value,
    pub name: Value,
    pub distance: f64,
}

/// Distance from `origin` to every tour start, nearest first.
pub fn distances(tours: &[Value], origin: LatLng, unit: Unit) -> Vec<TourDistance> {
    let meters_per_radian = EARTH_RADIUS_KM * 1000.0;
    let mut out: Vec<TourDistance> = tours
        .iter()
        .filter_map(|t| {
            let meters = central_angle(origin, start_point(t)?) * meters_per_radian;
            Some(TourDistance {
                id: t.get("id").cloned().unwrap_or(Value::Null),
                name: t.get("name").cloned().unwrap_or(Value::Null),
                distance: meters * unit.from_meters(),
            })
        })
        .collect();
    out.sort_by(|a, b| a.distance.total_cmp(&b.distance));
    out
}

#[derive(Debug, Default)]
struct Bucket {
    num_tours: u64,
    num_ratings: f64,
    rating_sum: f64,
    price_sum: f64,
    min_price: Option<f64>,
    max_price: Option<f64>,
}

/// Tours rated at least 4.5 grouped by difficulty, cheapest group first.
pub fn tour_stats(tours: &[Value]) -> Vec<Value> {
    let mut groups: BTreeMap<String, Bucket> = BTreeMap::new();
    for tour in tours {
        let rating = tour.get("ratingsAverage").and_then(Value::as_f64).unwrap_or(0.0);
        if rating < STATS_MIN_RATING {
            continue;
        }
        let difficulty = tour
            .get("difficulty")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_uppercase();
        let price = tour.get("price").and_then(Value::as_f64).unwrap_or(0.0);
        let b = groups.entry(difficulty).or_default();
        b.num_tours += 1;
        b.num_ratings += tour.get("ratingsQuantity").and_then(Value::as_f64).unwrap_or(0.0);
        b.rating_sum += rating;
        b.price_sum += price;
        b.min_price = Some(b.min_price.map_or(price, |m| m.min(price)));
        b.max_price = Some(b.max_price.map_or(price, |m| m.max(price)));
    }

    let mut rows: Vec<(f64, Value)> = groups
        .into_iter()
        .map(|(difficulty, b)| {
            let n = b.num_tours as f64;
            let avg_price = b.price_sum / n;
            let row = json!({
                "difficulty": difficulty,
                "numTours": b.num_tours,
                "numRatings": b.num_ratings,
                "avgRating": b.rating_sum / n,
                "avgPrice": avg_price,
                "minPrice": b.min_price,
                "maxPrice": b.max_price,
            });
            (avg_price, row)
        })
        .collect();
    rows.sort_by(|a, b| a.0.total_cmp(&b.0));
    rows.into_iter().map(|(_, row)| row).collect()
}

fn start_date(raw: &str) -> Option<Date> {
    let day = raw.get(..10)?;
    Date::parse(day, format_description!("[year]-[month]-[day]")).ok()
}

/// Start dates within `year` counted per month, busiest month first.
pub fn monthly_plan(tours: &[Value], year: i32) -> Vec<Value> {
    let mut months: BTreeMap<u8, Vec<String>> = BTreeMap::new();
    for tour in tours {
        let name = tour.get("name").and_then(Value::as_str).unwrap_or_default();
        let dates = tour.get("startDates").and_then(Value::as_array);
        for date in dates.into_iter().flatten().filter_map(Value::as_str).filter_map(start_date) {
            if date.year() == year {
                months.entry(u8::from(date.month())).or_default().push(name.to_string());
            }
        }
    }
    let mut plan: Vec<(u8, Vec<String>)> = months.into_iter().collect();
    // Stable sort keeps calendar order among equal counts.
    plan.sort_by(|a, b| b.1.len().cmp(&a.1.len()));
    plan.into_iter()
        .take(PLAN_LIMIT)
        .map(|(month, tours)| {
            json!({
                "month": month,
                "monthName": Month::try_from(month).map(|m| m.to_string()).unwrap_or_default(),
                "numTourStarts": tours.len(),
                "tours": tours,
            })
        })
        .collect()
}
