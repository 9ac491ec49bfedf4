//! HTTP fetch helpers shared by the version refresher and the downloader.
use std::fs::File;
use std::io::prelude::*;
use std::path::Path;
use std::time::Duration;

use curl::easy::Easy;

use util::{PackdResult, ChainError, human};

/// Create a new HTTP handle with appropriate global configuration.
///
/// The timeout option for libcurl by default times out the entire transfer,
/// but we probably don't want this. Instead we only set timeouts for the
/// connect phase as well as a "low speed" timeout so if we don't receive
/// many bytes in a large-ish period of time then we time out.
pub fn http_handle(timeout: Duration) -> PackdResult<Easy> {
    let mut handle = Easy::new();
    handle.connect_timeout(Duration::new(30, 0))?;
    handle.low_speed_limit(10 /* bytes per second */)?;
    handle.low_speed_time(timeout)?;
    handle.timeout(timeout)?;
    handle.follow_location(true)?;
    handle.useragent(&format!("packd/{}", env!("CARGO_PKG_VERSION")))?;
    Ok(handle)
}

/// Fetch a small text resource, returning the trimmed body.
pub fn fetch_text(url: &str, timeout: Duration) -> PackdResult<String> {
    let mut handle = http_handle(timeout)?;
    handle.get(true)?;
    handle.url(url)?;
    let mut body = Vec::new();
    {
        let mut transfer = handle.transfer();
        transfer.write_function(|buf| {
                body.extend_from_slice(buf);
                Ok(buf.len())
            })?;
        transfer.perform()
            .chain_error(|| human(format!("failed to fetch `{}`", url)))?;
    }
    let code = handle.response_code()?;
    if code != 200 && code != 0 {
        bail!("failed to get 200 response from `{}`, got {}", url, code);
    }
    let text = String::from_utf8(body)?;
    Ok(text.trim().to_string())
}

/// Fetch a (possibly large) resource straight into a file on disk.
pub fn fetch_file(url: &str, dest: &Path, timeout: Duration) -> PackdResult<()> {
    let mut handle = http_handle(timeout)?;
    handle.get(true)?;
    handle.url(url)?;
    let mut file = File::create(dest)?;
    {
        let mut transfer = handle.transfer();
        transfer.write_function(|buf| {
                match file.write_all(buf) {
                    Ok(()) => Ok(buf.len()),
                    // a short count aborts the transfer
                    Err(..) => Ok(0),
                }
            })?;
        transfer.perform()
            .chain_error(|| human(format!("failed to fetch `{}`", url)))?;
    }
    let code = handle.response_code()?;
    if code != 200 && code != 0 {
        bail!("failed to get 200 response from `{}`, got {}", url, code);
    }
    Ok(())
}
