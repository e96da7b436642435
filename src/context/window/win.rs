use std::path::Path;

use anyhow::{anyhow, Result};
use tracing::error;
use windows::{
    core::PWSTR,
    Win32::{
        Foundation::{CloseHandle, BOOL, HANDLE, HWND},
        System::Threading::{
            OpenProcess, QueryFullProcessImageNameW, PROCESS_NAME_WIN32,
            PROCESS_QUERY_INFORMATION, PROCESS_VM_READ,
        },
        UI::WindowsAndMessaging::{GetForegroundWindow, GetWindowTextW, GetWindowThreadProcessId},
    },
};

use super::{ActiveWindow, WindowSource};

#[tracing::instrument]
fn active_window() -> Result<Option<ActiveWindow>> {
    let window = unsafe { GetForegroundWindow() };
    // Nothing has focus while the workstation is locked.
    if window.is_invalid() {
        return Ok(None);
    }

    let mut pid = 0u32;
    unsafe { GetWindowThreadProcessId(window, Some(&mut pid)) };
    if pid == 0 {
        return Err(anyhow!(
            "Failed to get the window's process {}",
            windows::core::Error::from_win32()
        ));
    }
    let process_handle = unsafe {
        OpenProcess(
            PROCESS_QUERY_INFORMATION | PROCESS_VM_READ,
            BOOL::from(false),
            pid,
        )
    }
    .inspect_err(|e| error!("Failed to open process {e:?}"))?;

    let mut text: [u16; 4096] = [0; 4096];
    let process_path = unsafe { get_window_process_path(process_handle, &mut text) };
    let title = unsafe { get_window_title(window, &mut text) };
    unsafe { CloseHandle(process_handle) }
        .inspect_err(|e| error!("Failed to close handle {e:?}"))?;
    let process_path = process_path?;

    let app_name = Path::new(&process_path)
        .file_stem()
        .map(|v| v.to_string_lossy().into_owned())
        .unwrap_or(process_path);
    Ok(Some(ActiveWindow {
        app_name: app_name.into(),
        title: title.into(),
        pid: Some(pid),
    }))
}

unsafe fn get_window_process_path(process_handle: HANDLE, text: &mut [u16]) -> Result<String> {
    unsafe {
        let mut length = text.len() as u32;
        QueryFullProcessImageNameW(
            process_handle,
            PROCESS_NAME_WIN32,
            PWSTR(text.as_mut_ptr()),
            &mut length,
        )?;
        Ok(String::from_utf16_lossy(&text[..length as usize]))
    }
}

unsafe fn get_window_title(window_handle: HWND, text: &mut [u16]) -> String {
    let len = unsafe { GetWindowTextW(window_handle, text) };
    String::from_utf16_lossy(&text[..len.max(0) as usize])
}

/// Queries the foreground window through Win32.
#[derive(Default)]
pub struct WinWindowSource;

impl WinWindowSource {
    pub fn new() -> Self {
        Self
    }
}

impl WindowSource for WinWindowSource {
    fn active_window(&mut self) -> Result<Option<ActiveWindow>> {
        active_window().inspect_err(|e| error!("Failed to get active window {e:?}"))
    }
}
