//! Windows print spooler adapter.
//!
//! Printers are enumerated with `EnumPrintersW` (level 5) and raw jobs are
//! written with `StartDocPrinterW`/`WritePrinter` using the `RAW` datatype,
//! so the bytes reach the device without passing through the driver.
//! Printers attached to virtual ports (file output, XPS, OneNote) are hidden
//! because they cannot take printer command languages.
//!
//! The spooler cannot render HTML; `printhtml` reports an unsupported error.

#[cfg(windows)]
use tracing::{debug, info};

#[cfg(windows)]
use crate::application::devices::{DeviceError, JobOptions, PrintSpooler};

/// [`PrintSpooler`] backed by the Win32 print spooler.
#[cfg(windows)]
#[derive(Debug, Default, Clone, Copy)]
pub struct WinSpooler;

#[cfg(windows)]
impl PrintSpooler for WinSpooler {
    fn list_printers(&self) -> Result<Vec<String>, DeviceError> {
        use windows::core::PWSTR;
        use windows::Win32::Graphics::Printing::{
            EnumPrintersW, PRINTER_ENUM_CONNECTIONS, PRINTER_ENUM_LOCAL, PRINTER_INFO_5W,
        };

        let flags = PRINTER_ENUM_LOCAL | PRINTER_ENUM_CONNECTIONS;
        let mut needed: u32 = 0;
        let mut returned: u32 = 0;

        // SAFETY: the first call only reports the buffer size; the second
        // fills a buffer of exactly that size, which then holds `returned`
        // PRINTER_INFO_5W records whose strings point into the same buffer.
        unsafe {
            let _ = EnumPrintersW(flags, None, 5, None, &mut needed, &mut returned);
            if needed == 0 {
                return Ok(Vec::new());
            }

            let mut buf: Vec<u8> = vec![0; needed as usize];
            EnumPrintersW(flags, None, 5, Some(buf.as_mut_slice()), &mut needed, &mut returned)
                .map_err(|e| DeviceError::Spooler(format!("EnumPrintersW failed: {e}")))?;

            let records = std::slice::from_raw_parts(buf.as_ptr() as *const PRINTER_INFO_5W, returned as usize);
            let mut printers = Vec::with_capacity(records.len());
            for record in records {
                if record.pPrinterName.is_null() {
                    continue;
                }
                let name = PWSTR(record.pPrinterName.0).to_string().unwrap_or_default();
                let port = if record.pPortName.is_null() {
                    String::new()
                } else {
                    PWSTR(record.pPortName.0).to_string().unwrap_or_default()
                };
                if is_virtual_port(&port) {
                    debug!(printer = %name, %port, "skipping virtual printer");
                } else {
                    printers.push(name);
                }
            }
            debug!(count = printers.len(), "enumerated printers");
            Ok(printers)
        }
    }

    fn print_raw(&self, printer: &str, job: &JobOptions, data: &[u8]) -> Result<(), DeviceError> {
        let handle = OpenPrinter::open(printer)?;
        handle.write_document(&job.name, data, job.copies)?;
        info!(printer, job = %job.name, copies = job.copies, bytes = data.len(), "job submitted");
        Ok(())
    }

    fn print_html(&self, _printer: &str, _job: &JobOptions, _html: &str) -> Result<(), DeviceError> {
        Err(DeviceError::Unsupported("HTML printing"))
    }
}

/// A printer handle, closed on drop.
#[cfg(windows)]
struct OpenPrinter {
    name: String,
    handle: windows::Win32::Graphics::Printing::PRINTER_HANDLE,
}

#[cfg(windows)]
impl OpenPrinter {
    fn open(name: &str) -> Result<Self, DeviceError> {
        use windows::core::PCWSTR;
        use windows::Win32::Graphics::Printing::{OpenPrinterW, PRINTER_HANDLE};

        let wide = to_wide(name);
        let mut handle = PRINTER_HANDLE::default();
        // SAFETY: `wide` is NUL-terminated and outlives the call.
        unsafe { OpenPrinterW(PCWSTR::from_raw(wide.as_ptr()), &mut handle, None) }
            .map_err(|e| DeviceError::Spooler(format!("{name}: OpenPrinterW failed: {e}")))?;
        Ok(Self {
            name: name.to_string(),
            handle,
        })
    }

    /// Writes `data` `copies` times as one RAW document.
    fn write_document(&self, title: &str, data: &[u8], copies: u32) -> Result<(), DeviceError> {
        use core::ffi::c_void;
        use windows::core::PWSTR;
        use windows::Win32::Graphics::Printing::{
            EndDocPrinter, EndPagePrinter, StartDocPrinterW, StartPagePrinter, WritePrinter, DOC_INFO_1W,
        };

        let len = u32::try_from(data.len())
            .map_err(|_| DeviceError::Spooler(format!("{}: job too large", self.name)))?;
        let title_w = to_wide(title);
        let datatype_w = to_wide("RAW");
        let doc_info = DOC_INFO_1W {
            pDocName: PWSTR(title_w.as_ptr() as *mut _),
            pOutputFile: PWSTR::null(),
            pDatatype: PWSTR(datatype_w.as_ptr() as *mut _),
        };

        // SAFETY: the handle is open, the wide strings outlive the document
        // and `data` is valid for `len` bytes.
        unsafe {
            if StartDocPrinterW(self.handle, 1, &doc_info as *const DOC_INFO_1W) == 0 {
                return Err(self.failed("StartDocPrinter"));
            }
            if !StartPagePrinter(self.handle).as_bool() {
                let _ = EndDocPrinter(self.handle);
                return Err(self.failed("StartPagePrinter"));
            }

            let mut outcome = Ok(());
            for _ in 0..copies.max(1) {
                let mut written: u32 = 0;
                let ok = WritePrinter(self.handle, data.as_ptr() as *const c_void, len, &mut written);
                if !ok.as_bool() {
                    outcome = Err(self.failed("WritePrinter"));
                    break;
                }
                if written != len {
                    outcome = Err(DeviceError::Spooler(format!(
                        "{}: incomplete write ({written} of {len} bytes)",
                        self.name
                    )));
                    break;
                }
            }

            let _ = EndPagePrinter(self.handle);
            let _ = EndDocPrinter(self.handle);
            outcome
        }
    }

    fn failed(&self, call: &str) -> DeviceError {
        DeviceError::Spooler(format!("{}: {call} failed: {}", self.name, std::io::Error::last_os_error()))
    }
}

#[cfg(windows)]
impl Drop for OpenPrinter {
    fn drop(&mut self) {
        use windows::Win32::Graphics::Printing::ClosePrinter;
        // SAFETY: the handle came from OpenPrinterW and is closed once.
        let _ = unsafe { ClosePrinter(self.handle) };
    }
}

/// Ports that print to files or documents rather than devices.
#[cfg_attr(not(windows), allow(dead_code))]
fn is_virtual_port(port: &str) -> bool {
    let port = port.to_lowercase();
    matches!(port.as_str(), "file:" | "portprompt:" | "xpsport:" | "nul:")
        || port.starts_with("onenote")
        || port.starts_with("wfsport:")
}

/// NUL-terminated UTF-16 for the wide Win32 entry points.
#[cfg_attr(not(windows), allow(dead_code))]
fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}
