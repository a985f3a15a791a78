#[cfg(target_arch = "wasm32")]
fn main() {
    leptos::mount_to_body(crm_ui::App);
}

#[cfg(not(target_arch = "wasm32"))]
fn main() {
    eprintln!("crm-ui runs in the browser; build it for wasm32-unknown-unknown");
}
