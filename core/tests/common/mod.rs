//! Shared harness: a live echo server on a random port.

use std::sync::OnceLock;

/// Start the echo server once per test binary and return its base url.
pub fn echo_url() -> &'static str {
    static URL: OnceLock<String> = OnceLock::new();
    URL.get_or_init(|| {
        let std_listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = std_listener.local_addr().unwrap();
        std_listener.set_nonblocking(true).unwrap();

        std::thread::spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            rt.block_on(async {
                let listener = tokio::net::TcpListener::from_std(std_listener).unwrap();
                echo_server::run(listener).await
            })
            .unwrap();
        });

        format!("http://{addr}")
    })
}
