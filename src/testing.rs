use std::{cell::RefCell, io::Cursor, rc::Rc};

use crate::{Error, Head, Interval, RangeTransport};

/// An in-memory remote object which records every ranged request made against it.
pub(crate) struct Remote {
    data: Vec<u8>,
    fetches: Rc<RefCell<Vec<Interval>>>,
}

impl Remote {
    pub(crate) fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            fetches: Rc::default(),
        }
    }

    /// A handle on the request log, which stays usable after the transport is moved.
    pub(crate) fn fetches(&self) -> Rc<RefCell<Vec<Interval>>> {
        Rc::clone(&self.fetches)
    }
}

impl RangeTransport for Remote {
    type Body = Cursor<Vec<u8>>;

    fn head(&mut self) -> Result<Head, Error> {
        Ok(Head {
            length: Some(self.data.len() as u64),
            accept_ranges: Some("bytes".to_owned()),
        })
    }

    fn get_range(&mut self, range: Interval) -> Result<Self::Body, Error> {
        self.fetches.borrow_mut().push(range);
        let start = usize::try_from(range.start).map_err(|_| Error::Status(416))?;
        let end = usize::try_from(range.end).map_err(|_| Error::Status(416))?;
        self.data
            .get(start..=end)
            .map(|slice| Cursor::new(slice.to_vec()))
            .ok_or(Error::Status(416))
    }
}
