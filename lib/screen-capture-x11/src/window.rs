use crate::{Error, X11WindowSource};
use screen_capture::{Rectangle, WindowId, WindowInfo};
use x11rb::protocol::xproto::{Atom, AtomEnum, ConnectionExt, MapState};

// Property reads are capped at 64 KiB
const MAX_PROPERTY_LONGS: u32 = 16 * 1024;

impl X11WindowSource {
    /// Size from `GetGeometry`, position translated into root coordinates.
    pub(crate) fn window_geometry(&self, window: WindowId) -> Result<Rectangle, Error> {
        let geometry = self
            .conn
            .get_geometry(window)?
            .reply()
            .map_err(Error::reply("GetGeometry"))?;

        if window == self.root {
            return Ok(Rectangle::new(
                0,
                0,
                geometry.width as i32,
                geometry.height as i32,
            ));
        }

        let origin = self
            .conn
            .translate_coordinates(window, self.root, 0, 0)?
            .reply()
            .map_err(Error::reply("TranslateCoordinates"))?;

        Ok(Rectangle::new(
            origin.dst_x as i32,
            origin.dst_y as i32,
            geometry.width as i32,
            geometry.height as i32,
        ))
    }

    pub(crate) fn window_map_state(&self, window: WindowId) -> Result<MapState, Error> {
        let attributes = self
            .conn
            .get_window_attributes(window)?
            .reply()
            .map_err(Error::reply("GetWindowAttributes"))?;
        Ok(attributes.map_state)
    }

    pub(crate) fn net_active_window(&self) -> Result<Option<WindowId>, Error> {
        let windows = self.property_u32(
            self.root,
            self.atoms._NET_ACTIVE_WINDOW,
            AtomEnum::WINDOW.into(),
        )?;
        Ok(windows.first().copied().filter(|w| *w != x11rb::NONE))
    }

    pub(crate) fn client_list(&self) -> Result<Vec<WindowInfo>, Error> {
        let windows = self.property_u32(
            self.root,
            self.atoms._NET_CLIENT_LIST,
            AtomEnum::WINDOW.into(),
        )?;

        let mut infos = Vec::with_capacity(windows.len());
        for id in windows {
            // clients may disappear between the two requests
            match self.window_info(id) {
                Ok(info) => infos.push(info),
                Err(e) if e.is_missing_window() => log::debug!("skip window {id:#x}: {e}"),
                Err(e) => return Err(e),
            }
        }

        Ok(infos)
    }

    fn window_info(&self, id: WindowId) -> Result<WindowInfo, Error> {
        let mut title =
            self.property_string(id, self.atoms._NET_WM_NAME, self.atoms.UTF8_STRING)?;
        if title.is_empty() {
            title = self.property_string(id, AtomEnum::WM_NAME.into(), AtomEnum::STRING.into())?;
        }

        let class = self.property_string(id, AtomEnum::WM_CLASS.into(), AtomEnum::STRING.into())?;

        Ok(WindowInfo {
            id,
            title,
            class: parse_wm_class(&class),
        })
    }

    pub(crate) fn top_level_ancestor(&self, window: WindowId) -> Result<WindowId, Error> {
        let mut current = window;

        loop {
            if current == self.root {
                return Ok(window);
            }

            let tree = self
                .conn
                .query_tree(current)?
                .reply()
                .map_err(Error::reply("QueryTree"))?;

            if tree.parent == tree.root || tree.parent == x11rb::NONE {
                return Ok(current);
            }

            current = tree.parent;
        }
    }

    fn property_u32(
        &self,
        window: WindowId,
        property: Atom,
        type_: Atom,
    ) -> Result<Vec<u32>, Error> {
        let reply = self
            .conn
            .get_property(false, window, property, type_, 0, MAX_PROPERTY_LONGS)?
            .reply()
            .map_err(Error::reply("GetProperty"))?;

        Ok(reply
            .value32()
            .map(|values| values.collect())
            .unwrap_or_default())
    }

    fn property_string(
        &self,
        window: WindowId,
        property: Atom,
        type_: Atom,
    ) -> Result<String, Error> {
        let reply = self
            .conn
            .get_property(false, window, property, type_, 0, MAX_PROPERTY_LONGS)?
            .reply()
            .map_err(Error::reply("GetProperty"))?;

        let value = match reply.value.last() {
            Some(0) => &reply.value[..reply.value.len() - 1],
            _ => &reply.value[..],
        };

        Ok(String::from_utf8_lossy(value).into_owned())
    }
}

/// `WM_CLASS` holds two NUL separated strings: instance then class.
pub(crate) fn parse_wm_class(value: &str) -> Option<(String, String)> {
    let mut parts = value.split('\0').filter(|s| !s.is_empty());
    let instance = parts.next()?;
    let class = parts.next().unwrap_or(instance);
    Some((instance.to_string(), class.to_string()))
}
