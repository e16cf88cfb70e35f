//! Image uploads: request extraction with the image-only filter, resizing
//! and persistence through the storage client.

mod services;
mod upload;

pub use services::{
    discard_images, resize_jpeg, store_tour_images, store_user_photo, tour_image_names,
    TOUR_IMAGE_SIZE, USER_PHOTO_SIZE,
};
pub use upload::{Upload, UploadForm, UPLOAD_BODY_LIMIT};
