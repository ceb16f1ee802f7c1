use ndarray::Array4;
use opencv::{
    core::{copy_make_border, Mat, Scalar, Size, BORDER_CONSTANT, CV_32FC3},
    imgproc,
    prelude::*,
};

use crate::error::{AnalysisError, Result};

/// レターボックス変換の記録
///
/// 検出結果のモデル入力座標を元画像ピクセルへ戻すために使う。
#[derive(Debug, Clone, Copy)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub src_width: f32,
    pub src_height: f32,
}

impl Letterbox {
    /// モデル入力座標 → 元画像ピクセル座標
    pub fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
        let sx = ((x - self.pad_x) / self.scale).clamp(0.0, self.src_width);
        let sy = ((y - self.pad_y) / self.scale).clamp(0.0, self.src_height);
        (sx, sy)
    }
}

fn pre_err(e: impl std::fmt::Display) -> AnalysisError {
    AnalysisError::Detection(format!("preprocess failed: {e}"))
}

/// BGR Mat 群 → NCHW [N, 3, size, size] の f32 テンソル
///
/// 縦横比を保ってリサイズし、黒でレターボックスする。
pub fn letterbox_batch(images: &[&Mat], input_size: i32) -> Result<(Array4<f32>, Vec<Letterbox>)> {
    let s = input_size as usize;
    let mut tensor = Array4::<f32>::zeros((images.len(), 3, s, s));
    let mut boxes = Vec::with_capacity(images.len());

    for (bi, &image) in images.iter().enumerate() {
        let src_w = image.cols();
        let src_h = image.rows();
        if src_w <= 0 || src_h <= 0 {
            return Err(pre_err("empty image in batch"));
        }
        let scale = (input_size as f32 / src_w as f32).min(input_size as f32 / src_h as f32);
        let new_w = ((src_w as f32 * scale).round() as i32).clamp(1, input_size);
        let new_h = ((src_h as f32 * scale).round() as i32).clamp(1, input_size);
        let pad_left = (input_size - new_w) / 2;
        let pad_top = (input_size - new_h) / 2;

        // BGR -> RGB
        let mut rgb = Mat::default();
        imgproc::cvt_color_def(image, &mut rgb, imgproc::COLOR_BGR2RGB).map_err(pre_err)?;

        let mut resized = Mat::default();
        imgproc::resize(
            &rgb,
            &mut resized,
            Size::new(new_w, new_h),
            0.0,
            0.0,
            imgproc::INTER_LINEAR,
        )
        .map_err(pre_err)?;

        // 黒パディングで正方形に
        let mut canvas = Mat::default();
        copy_make_border(
            &resized,
            &mut canvas,
            pad_top,
            input_size - new_h - pad_top,
            pad_left,
            input_size - new_w - pad_left,
            BORDER_CONSTANT,
            Scalar::all(0.0),
        )
        .map_err(pre_err)?;

        // f32 に変換して [0,255] → [0,1]、NCHW 詰め替え
        let mut float_mat = Mat::default();
        canvas
            .convert_to(&mut float_mat, CV_32FC3, 1.0, 0.0)
            .map_err(pre_err)?;
        let data = float_mat.data_bytes().map_err(pre_err)?;
        let step = float_mat.mat_step().get(0);
        for y in 0..s {
            let row_ptr = unsafe {
                std::slice::from_raw_parts(data.as_ptr().add(y * step) as *const f32, s * 3)
            };
            for x in 0..s {
                for c in 0..3 {
                    tensor[[bi, c, y, x]] = row_ptr[x * 3 + c] / 255.0;
                }
            }
        }

        boxes.push(Letterbox {
            scale,
            pad_x: pad_left as f32,
            pad_y: pad_top as f32,
            src_width: src_w as f32,
            src_height: src_h as f32,
        });
    }

    Ok((tensor, boxes))
}
