use anyhow::{anyhow, Context, Result};
use async_std::task::{self, JoinHandle};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use rusty_dreams_core::protocol::ProgressPhase;
use rusty_dreams_core::request::RawImage;
use rusty_dreams_stem::{LifecycleController, SubscriptionId};
use std::path::Path;

/// Terminal progress bar for one controller operation, fed from a channel
/// subscription on the progress bus.
pub struct ProgressView {
    bar: ProgressBar,
    subscription: SubscriptionId,
    pump: JoinHandle<()>,
}

impl ProgressView {
    pub fn attach(controller: &LifecycleController) -> Self {
        let bar = ProgressBar::new(100);
        if let Ok(style) =
            ProgressStyle::with_template("{spinner:.green} [{bar:40.cyan/blue}] {pos:>3}% {msg}")
        {
            bar.set_style(style.progress_chars("=> "));
        }

        let (subscription, mut events) = controller.progress().subscribe_channel();
        let sink = bar.clone();
        let pump = task::spawn(async move {
            while let Some(event) = events.next().await {
                sink.set_position(event.percent as u64);
                sink.set_message(format!("{}: {}", event.phase, event.message));
                if matches!(event.phase, ProgressPhase::Error) {
                    sink.abandon();
                }
            }
        });

        Self {
            bar,
            subscription,
            pump,
        }
    }

    /// Stop listening, draw whatever was still queued, then clear the bar.
    pub async fn finish(self, controller: &LifecycleController) {
        controller.unsubscribe(self.subscription);
        self.pump.await;
        self.bar.finish_and_clear();
    }
}

pub fn save_png(image: &RawImage, path: &Path) -> Result<()> {
    let buffer = image::RgbaImage::from_raw(image.width, image.height, image.pixels.clone())
        .ok_or_else(|| anyhow!("image buffer does not match {}x{}", image.width, image.height))?;
    buffer
        .save(path)
        .with_context(|| format!("writing {}", path.display()))
}
