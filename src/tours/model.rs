use serde_json::{Map, Value};

use crate::factory::fields::{check_range, f64_of, is_present, str_of};

pub const NAME_MIN: usize = 10;
pub const NAME_MAX: usize = 40;
pub const DEFAULT_RATING: f64 = 4.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Difficulty {
    Easy,
    Medium,
    Difficult,
}

impl Difficulty {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "easy" => Some(Difficulty::Easy),
            "medium" => Some(Difficulty::Medium),
            "difficult" => Some(Difficulty::Difficult),
            _ => None,
        }
    }
}

/// URL slug: lowercase alphanumerics joined by single dashes.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            slug.push(c);
        } else if !slug.is_empty() && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// Pre-save: slug, defaults and rating rounding.
pub fn prepare(body: &mut Map<String, Value>) {
    if let Some(name) = str_of(body, "name").map(|n| n.trim().to_string()) {
        body.insert("slug".into(), Value::String(slugify(&name)));
        body.insert("name".into(), Value::String(name));
    }
    if let Some(summary) = str_of(body, "summary").map(|s| s.trim().to_string()) {
        body.insert("summary".into(), Value::String(summary));
    }
    body.entry("ratingsAverage").or_insert(Value::from(DEFAULT_RATING));
    body.entry("ratingsQuantity").or_insert(Value::from(0));
    body.entry("secretTour").or_insert(Value::Bool(false));
    body.entry("images").or_insert(Value::Array(Vec::new()));
    body.entry("startDates").or_insert(Value::Array(Vec::new()));
    body.entry("guides").or_insert(Value::Array(Vec::new()));
    if let Some(avg) = f64_of(body, "ratingsAverage") {
        body.insert("ratingsAverage".into(), Value::from((avg * 10.0).round() / 10.0));
    }
}

pub fn validate(body: &Map<String, Value>) -> Vec<String> {
    let mut errors = Vec::new();

    match str_of(body, "name") {
        Some(name) if !name.trim().is_empty() => {
            let len = name.chars().count();
            if len > NAME_MAX {
                errors.push(format!("A tour name must have less or equal then {NAME_MAX} characters"));
            }
            if len < NAME_MIN {
                errors.push(format!("A tour name must have more or equal then {NAME_MIN} characters"));
            }
        }
        _ => errors.push("A tour must have a name".into()),
    }

    if !is_present(body, "duration") {
        errors.push("A tour must have a duration".into());
    } else {
        check_range(body, "duration", 1.0, f64::MAX, "Duration must be a positive number", &mut errors);
    }
    if !is_present(body, "maxGroupSize") {
        errors.push("A tour must have a group size".into());
    } else {
        check_range(body, "maxGroupSize", 1.0, f64::MAX, "Group size must be a positive number", &mut errors);
    }

    match str_of(body, "difficulty") {
        Some(d) if Difficulty::parse(d).is_some() => {}
        Some(_) => errors.push("Difficulty is either: easy, medium, difficult".into()),
        None => errors.push("A tour must have a difficulty".into()),
    }

    if let Some(avg) = body.get("ratingsAverage") {
        match avg.as_f64() {
            Some(v) if v < 1.0 => errors.push("Rating must be above 1.0".into()),
            Some(v) if v > 5.0 => errors.push("Rating must be below 5.0".into()),
            Some(_) => {}
            None => errors.push("Rating must be a number".into()),
        }
    }

    if !is_present(body, "price") {
        errors.push("A tour must have a price".into());
    } else {
        match f64_of(body, "price") {
            Some(price) if price > 0.0 => {
                if let Some(discount) = f64_of(body, "priceDiscount") {
                    if discount >= price {
                        errors.push(format!(
                            "Discount price ({discount}) should be below regular price"
                        ));
                    }
                }
            }
            _ => errors.push("A tour price must be a number greater than zero".into()),
        }
    }

    if !is_present(body, "summary") {
        errors.push("A tour must have a summary".into());
    }
    if !is_present(body, "imageCover") {
        errors.push("A tour must have a cover image".into());
    }

    if let Some(guides) = body.get("guides") {
        let ok = guides.as_array().map_or(false, |ids| {
            ids.iter()
                .all(|g| g.as_str().map_or(false, |s| uuid::Uuid::parse_str(s).is_ok()))
        });
        if !ok {
            errors.push("Guides must be a list of user ids".into());
        }
    }

    errors
}
