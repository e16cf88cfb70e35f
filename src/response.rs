//! Success envelopes: `{"status":"success","data":{"data":…}}`, lists add `results`.

use axum::{http::StatusCode, Json};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<usize>,
    pub data: Data<T>,
}

#[derive(Debug, Serialize)]
pub struct Data<T> {
    pub data: T,
}

pub fn success_one<T: Serialize>(data: T) -> Json<Envelope<T>> {
    Json(Envelope {
        status: "success",
        results: None,
        data: Data { data },
    })
}

pub fn created<T: Serialize>(data: T) -> (StatusCode, Json<Envelope<T>>) {
    (StatusCode::CREATED, success_one(data))
}

pub fn success_many<T: Serialize>(data: Vec<T>) -> Json<Envelope<Vec<T>>> {
    Json(Envelope {
        status: "success",
        results: Some(data.len()),
        data: Data { data },
    })
}
