use candle_core::{DType, Device, Tensor};
use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::config::PreprocessSettings;
use crate::error::XrayResult;

/// Turns encoded image bytes into the normalised `[1, 3, crop, crop]` tensor
/// the ensemble expects: resize, center-crop, scale to [0, 1], then
/// `(x - mean) / std` per channel.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    resize: u32,
    crop_size: u32,
    mean: [f32; 3],
    std: [f32; 3],
}

impl Preprocessor {
    pub fn new(settings: &PreprocessSettings) -> Self {
        Self {
            resize: settings.resize,
            crop_size: settings.crop_size,
            mean: settings.mean,
            std: settings.std,
        }
    }

    pub fn input_size(&self) -> usize {
        self.crop_size as usize
    }

    /// Decode any format the `image` crate recognises and convert to RGB.
    pub fn decode(&self, bytes: &[u8]) -> XrayResult<RgbImage> {
        Ok(image::load_from_memory(bytes)?.to_rgb8())
    }

    pub fn resize_and_crop(&self, image: &RgbImage) -> RgbImage {
        let resized = imageops::resize(image, self.resize, self.resize, FilterType::Triangle);
        if self.crop_size == self.resize {
            return resized;
        }

        let offset = (self.resize - self.crop_size) / 2;
        imageops::crop_imm(&resized, offset, offset, self.crop_size, self.crop_size).to_image()
    }

    pub fn to_tensor(&self, image: &RgbImage, device: &Device) -> candle_core::Result<Tensor> {
        let (width, height) = image.dimensions();
        let pixels = Tensor::from_vec(
            image.as_raw().clone(),
            (height as usize, width as usize, 3),
            &Device::Cpu,
        )?
        .permute((2, 0, 1))?
        .to_dtype(DType::F32)?
        .affine(1.0 / 255.0, 0.0)?;

        let mean = Tensor::from_slice(&self.mean, (3, 1, 1), &Device::Cpu)?;
        let std = Tensor::from_slice(&self.std, (3, 1, 1), &Device::Cpu)?;

        pixels
            .broadcast_sub(&mean)?
            .broadcast_div(&std)?
            .unsqueeze(0)?
            .to_device(device)
    }

    pub fn tensor_from_bytes(&self, bytes: &[u8], device: &Device) -> XrayResult<Tensor> {
        let image = self.decode(bytes)?;
        let prepared = self.resize_and_crop(&image);
        Ok(self.to_tensor(&prepared, device)?)
    }
}

#[cfg(test)]
pub(crate) fn encode_png(image: &RgbImage) -> Vec<u8> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(image.clone())
        .write_to(&mut cursor, image::ImageOutputFormat::Png)
        .unwrap();
    cursor.into_inner()
}
