//! 图像生成数据模型
//!
//! 前端请求仅携带提示词和模型名，其余参数固定后转发给 Venice。
use serde::{Deserialize, Serialize};

pub const IMAGE_WIDTH: u32 = 1024;
pub const IMAGE_HEIGHT: u32 = 1024;
pub const IMAGE_STEPS: u32 = 30;
pub const IMAGE_CFG_SCALE: f32 = 5.0;
pub const IMAGE_STYLE_PRESET: &str = "Photographic";

/// 前端图像生成请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageGenerationRequest {
    pub prompt: String,
    pub model: String,
}

/// 前端图像生成响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageGenerationResponse {
    /// Base64 编码的图像数据
    pub image_data: String,
}

/// 错误响应体（与前端约定的 `detail` 字段）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub detail: String,
}

/// Venice 图像生成上游请求
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VeniceImageRequest {
    pub model: String,
    pub prompt: String,
    pub width: u32,
    pub height: u32,
    pub steps: u32,
    pub safe_mode: bool,
    pub hide_watermark: bool,
    pub cfg_scale: f32,
    pub style_preset: String,
    pub return_binary: bool,
}

impl VeniceImageRequest {
    /// 使用固定参数构建上游请求
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            width: IMAGE_WIDTH,
            height: IMAGE_HEIGHT,
            steps: IMAGE_STEPS,
            safe_mode: false,
            hide_watermark: true,
            cfg_scale: IMAGE_CFG_SCALE,
            style_preset: IMAGE_STYLE_PRESET.to_string(),
            return_binary: true,
        }
    }
}

impl From<&ImageGenerationRequest> for VeniceImageRequest {
    fn from(req: &ImageGenerationRequest) -> Self {
        Self::new(req.model.clone(), req.prompt.clone())
    }
}
