use std::path::PathBuf;

use chromiumoxide::{cdp::browser_protocol::page::PrintToPdfParams, Browser, BrowserConfig};
use log::{debug, warn};
use rocket::futures::StreamExt;

use crate::error::Error;

/// A4 paper size in inches.
const A4_INCHES: (f64, f64) = (8.27, 11.69);

/// Prints HTML documents to PDF with a headless Chromium.
///
/// A browser is launched per print; reports are generated at most once per match.
pub struct PdfPrinter {
    chrome_executable: Option<PathBuf>,
}

impl PdfPrinter {
    /// Use the given browser binary, or search for one if `None`.
    pub fn new(chrome_executable: Option<PathBuf>) -> Self {
        Self { chrome_executable }
    }

    /// Render `html` and print it to PDF bytes.
    #[cfg(not(test))]
    pub async fn print(&self, html: &str) -> Result<Vec<u8>, Error> {
        self.print_with_browser(html).await
    }

    /// Stand-in for printing: the "PDF" is a marker followed by the HTML itself.
    #[cfg(test)]
    pub async fn print(&self, html: &str) -> Result<Vec<u8>, Error> {
        Ok([TEST_PDF_MARKER, html.as_bytes()].concat())
    }

    async fn print_with_browser(&self, html: &str) -> Result<Vec<u8>, Error> {
        let mut builder = BrowserConfig::builder().no_sandbox().args(vec![
            "--disable-gpu",
            "--disable-dev-shm-usage",
        ]);
        if let Some(path) = &self.chrome_executable {
            builder = builder.chrome_executable(path);
        }
        let config = builder.build().map_err(Error::Browser)?;

        let (mut browser, mut handler) = Browser::launch(config).await?;
        debug!("Browser launched for report printing");

        // The browser only makes progress while its events are being handled.
        let events = rocket::tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let printed = async {
            let page = browser.new_page("about:blank").await?;
            page.set_content(html).await?;
            let params = PrintToPdfParams::builder()
                .print_background(true)
                .paper_width(A4_INCHES.0)
                .paper_height(A4_INCHES.1)
                .build();
            page.pdf(params).await
        }
        .await;

        // Always shut the browser down, even if printing failed.
        if let Err(e) = browser.close().await {
            warn!("Failed to close report browser: {e}");
        }
        if let Err(e) = browser.wait().await {
            warn!("Failed to reap report browser: {e}");
        }
        events.abort();

        Ok(printed?)
    }
}

#[cfg(test)]
pub const TEST_PDF_MARKER: &[u8] = b"%PDF-test\n";

#[cfg(test)]
mod tests {
    use super::*;

    /// Optional browser binary for the printing test; otherwise one is searched for.
    const TEST_CHROME_VAR: &str = "ICEBREAKER_TEST_CHROME";

    #[rocket::async_test]
    #[ignore = "needs a Chromium or Chrome binary"]
    async fn prints_with_headless_browser() {
        let printer = PdfPrinter::new(std::env::var_os(TEST_CHROME_VAR).map(PathBuf::from));
        let pdf = printer
            .print_with_browser("<html><body><h1>Kim Minji &amp; Park Jiho</h1></body></html>")
            .await
            .unwrap();
        assert!(pdf.starts_with(b"%PDF-"));
        assert!(!pdf.starts_with(TEST_PDF_MARKER));
    }
}
