use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        Dropout, DropoutConfig,
        Linear, LinearConfig,
        PaddingConfig2d, Relu,
    },
    prelude::*,
};

use crate::domain::error::{self, CaptchaError};

/// Three 2x2 pools shrink each side by this factor.
const POOL_REDUCTION: usize = 8;
const CONV_CHANNELS: [usize; 4] = [1, 32, 64, 128];
const DENSE_UNITS: usize = 1024;

// NOTE: #[derive(Config)] already generates Clone and Serialize/Deserialize
// internally — do NOT add them again or you get conflicting impls.
#[derive(Config, Debug)]
pub struct CaptchaCnnConfig {
    pub image_height: usize,
    pub image_width:  usize,
    pub max_captcha:  usize,
    pub char_set_len: usize,
    #[config(default = 0.25)]
    pub dropout:      f64,
}

impl CaptchaCnnConfig {
    /// Images must survive three halvings with at least one pixel left.
    pub fn validate(&self) -> error::Result<()> {
        if self.image_height < POOL_REDUCTION || self.image_width < POOL_REDUCTION {
            return Err(CaptchaError::config(format!(
                "images must be at least {POOL_REDUCTION} x {POOL_REDUCTION}, got {} x {}",
                self.image_height, self.image_width
            )));
        }
        if self.max_captcha == 0 || self.char_set_len == 0 {
            return Err(CaptchaError::config("label length and alphabet size must be non-zero"));
        }
        Ok(())
    }

    pub fn output_len(&self) -> usize {
        self.max_captcha * self.char_set_len
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> error::Result<CaptchaCnn<B>> {
        self.validate()?;

        let conv = |i: usize| -> Conv2d<B> {
            Conv2dConfig::new([CONV_CHANNELS[i], CONV_CHANNELS[i + 1]], [3, 3])
                .with_padding(PaddingConfig2d::Same)
                .init(device)
        };
        let pooled = (self.image_height / POOL_REDUCTION) * (self.image_width / POOL_REDUCTION);

        Ok(CaptchaCnn {
            conv1:   conv(0),
            conv2:   conv(1),
            conv3:   conv(2),
            pool:    MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            relu:    Relu::new(),
            dropout: DropoutConfig::new(self.dropout).init(),
            dense:   LinearConfig::new(CONV_CHANNELS[3] * pooled, DENSE_UNITS).init(device),
            output:  LinearConfig::new(DENSE_UNITS, self.output_len()).init(device),
            image_height: self.image_height,
            image_width:  self.image_width,
        })
    }
}

#[derive(Module, Debug)]
pub struct CaptchaCnn<B: Backend> {
    pub conv1:   Conv2d<B>,
    pub conv2:   Conv2d<B>,
    pub conv3:   Conv2d<B>,
    pub pool:    MaxPool2d,
    pub relu:    Relu,
    pub dropout: Dropout,
    pub dense:   Linear<B>,
    pub output:  Linear<B>,
    pub image_height: usize,
    pub image_width:  usize,
}

impl<B: Backend> CaptchaCnn<B> {
    /// features: [batch, H * W] → logits: [batch, L * K]
    pub fn forward(&self, features: Tensor<B, 2>) -> Tensor<B, 2> {
        let [batch_size, _] = features.dims();
        let x = features.reshape([batch_size, 1, self.image_height, self.image_width]);

        let x = self.block(&self.conv1, x);
        let x = self.block(&self.conv2, x);
        let x = self.block(&self.conv3, x);

        let x: Tensor<B, 2> = x.flatten(1, 3);
        let x = self.dropout.forward(self.relu.forward(self.dense.forward(x)));
        self.output.forward(x)
    }

    fn block(&self, conv: &Conv2d<B>, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.pool.forward(self.relu.forward(conv.forward(x)));
        self.dropout.forward(x)
    }

    /// Mean per-position sigmoid cross-entropy against one-hot labels.
    pub fn forward_loss(&self, features: Tensor<B, 2>, labels: Tensor<B, 2>) -> Tensor<B, 1> {
        sigmoid_cross_entropy(self.forward(features), labels)
    }
}

/// mean(max(x, 0) - x * z + ln(1 + e^-|x|)), the numerically stable
/// form of binary cross-entropy on logits.
pub fn sigmoid_cross_entropy<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 2>) -> Tensor<B, 1> {
    let positive = logits.clone().clamp_min(0.0);
    let softplus = logits.clone().abs().neg().exp().add_scalar(1.0).log();
    (positive - logits * targets + softplus).mean()
}
