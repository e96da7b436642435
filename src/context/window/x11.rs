use anyhow::{anyhow, Result};
use tracing::instrument;
use xcb::{
    x::{self, Atom, GetProperty, GrabServer, InternAtom, UngrabServer, Window, ATOM_ANY},
    Connection, Xid,
};

use super::{ActiveWindow, WindowSource};
use crate::context::game::{ProcessSource, SysinfoProcessSource};

fn intern_atom(conn: &Connection, name: &[u8]) -> Result<Atom> {
    let reply = conn.wait_for_reply(conn.send_request(&InternAtom {
        only_if_exists: false,
        name,
    }))?;
    Ok(reply.atom())
}

fn get_property(
    conn: &Connection,
    window: Window,
    property: Atom,
    long_length: u32,
) -> Result<x::GetPropertyReply> {
    Ok(conn.wait_for_reply(conn.send_request(&GetProperty {
        delete: false,
        window,
        property,
        r#type: ATOM_ANY,
        long_offset: 0,
        long_length,
    }))?)
}

/// Reads the focused window from the EWMH properties of the root window.
pub struct XcbWindowSource {
    connection: Connection,
    preferred_screen: usize,
    active_window_atom: Atom,
    window_name_atom: Atom,
    pid_atom: Atom,
    processes: SysinfoProcessSource,
}

impl XcbWindowSource {
    pub fn new() -> Result<Self> {
        let (connection, preferred_screen) = Connection::connect(None)?;
        let active_window_atom = intern_atom(&connection, b"_NET_ACTIVE_WINDOW")?;
        let window_name_atom = intern_atom(&connection, b"_NET_WM_NAME")?;
        let pid_atom = intern_atom(&connection, b"_NET_WM_PID")?;
        Ok(Self {
            connection,
            preferred_screen: preferred_screen.max(0) as usize,
            active_window_atom,
            window_name_atom,
            pid_atom,
            processes: SysinfoProcessSource::new(),
        })
    }

    fn root(&self) -> Result<Window> {
        self.connection
            .get_setup()
            .roots()
            .nth(self.preferred_screen)
            .map(|v| v.root())
            .ok_or_else(|| anyhow!("X screen {} does not exist", self.preferred_screen))
    }

    #[instrument(skip(self))]
    fn active_inner(&mut self) -> Result<Option<ActiveWindow>> {
        let root = self.root()?;
        let reply = get_property(&self.connection, root, self.active_window_atom, 1)?;
        let Some(&window) = reply.value::<Window>().first() else {
            return Ok(None);
        };
        if window.resource_id() == 0 {
            return Ok(None);
        }

        let name = get_property(&self.connection, window, self.window_name_atom, 1024)?;
        let title = String::from_utf8_lossy(name.value::<u8>()).into_owned();
        let pid = get_property(&self.connection, window, self.pid_atom, 1)?
            .value::<u32>()
            .first()
            .copied();
        let app_name = match pid {
            Some(pid) => self.processes.process(pid)?.map(|v| v.name),
            None => None,
        };

        Ok(Some(ActiveWindow {
            app_name: app_name.as_deref().unwrap_or("unknown").into(),
            title: title.into(),
            pid,
        }))
    }
}

impl WindowSource for XcbWindowSource {
    fn active_window(&mut self) -> Result<Option<ActiveWindow>> {
        // The window may close between the property reads.
        let _ = self.connection.send_request(&GrabServer {});
        let result = self.active_inner();
        let _ = self.connection.send_request(&UngrabServer {});
        result
    }
}
