use zbus::proxy;

/// Client side of `org.freedesktop.Facecam1`, served by `facecamd`.
#[proxy(
    interface = "org.freedesktop.Facecam1",
    default_service = "org.freedesktop.Facecam1",
    default_path = "/org/freedesktop/Facecam1"
)]
pub trait Facecam {
    async fn start(&self) -> zbus::Result<String>;
    async fn stop(&self) -> zbus::Result<()>;
    async fn set_scale_factor(&self, value: f64) -> zbus::Result<()>;
    async fn set_min_neighbors(&self, value: u32) -> zbus::Result<()>;
    async fn status(&self) -> zbus::Result<String>;
    async fn save_overlay(&self, path: &str) -> zbus::Result<()>;
    async fn save_snapshot(&self, path: &str) -> zbus::Result<()>;
}
