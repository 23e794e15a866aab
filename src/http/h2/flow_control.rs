//! Flow-control windows (RFC 9113 §5.2, §6.9)
//!
//! The connection and every stream each own a `FlowControl`: a send window
//! the peer refills with WINDOW_UPDATE, and a receive window this side
//! refills once half of it has been used.

use super::error::{Error, Result};
use super::settings::DEFAULT_INITIAL_WINDOW_SIZE;

/// 2^31 - 1
pub const MAX_WINDOW_SIZE: i64 = 0x7FFF_FFFF;

#[derive(Debug, Clone)]
pub struct FlowControlWindow {
    initial_size: u32,
    /// Negative after SETTINGS shrinks the initial size below what is in flight
    size: i64,
}

impl FlowControlWindow {
    pub fn with_initial_size(initial_size: u32) -> Self {
        FlowControlWindow {
            initial_size,
            size: i64::from(initial_size),
        }
    }

    pub fn size(&self) -> i64 {
        self.size
    }

    pub fn initial_size(&self) -> u32 {
        self.initial_size
    }

    pub fn available(&self) -> usize {
        usize::try_from(self.size).unwrap_or(0)
    }

    /// Take up to `amount` octets of credit, returning what was granted
    pub fn consume(&mut self, amount: usize) -> usize {
        let granted = amount.min(self.available());
        self.size -= granted as i64;
        granted
    }

    /// Apply a WINDOW_UPDATE increment
    pub fn increase(&mut self, increment: u32) -> Result<i64> {
        if increment == 0 {
            return Err(Error::Protocol("WINDOW_UPDATE increment of 0".to_string()));
        }
        self.size = self.checked(self.size + i64::from(increment))?;
        Ok(self.size)
    }

    /// Charge inbound DATA; the peer may not exceed what it was granted
    pub fn receive(&mut self, amount: usize) -> Result<()> {
        let amount = amount as i64;
        if amount > self.size {
            return Err(Error::FlowControl(format!(
                "peer sent {} octets into a window of {}",
                amount, self.size
            )));
        }
        self.size -= amount;
        Ok(())
    }

    /// SETTINGS_INITIAL_WINDOW_SIZE changed: shift by the difference (§6.9.2)
    pub fn update_initial_size(&mut self, initial_size: u32) -> Result<()> {
        let delta = i64::from(initial_size) - i64::from(self.initial_size);
        self.size = self.checked(self.size + delta)?;
        self.initial_size = initial_size;
        Ok(())
    }

    fn checked(&self, size: i64) -> Result<i64> {
        if size > MAX_WINDOW_SIZE {
            return Err(Error::FlowControl(format!("window of {} above 2^31-1", size)));
        }
        Ok(size)
    }
}

impl Default for FlowControlWindow {
    fn default() -> Self {
        Self::with_initial_size(DEFAULT_INITIAL_WINDOW_SIZE)
    }
}

#[derive(Debug, Clone, Default)]
pub struct FlowControl {
    send: FlowControlWindow,
    recv: FlowControlWindow,
}

impl FlowControl {
    pub fn with_initial_sizes(send_size: u32, recv_size: u32) -> Self {
        FlowControl {
            send: FlowControlWindow::with_initial_size(send_size),
            recv: FlowControlWindow::with_initial_size(recv_size),
        }
    }

    pub fn send_window_mut(&mut self) -> &mut FlowControlWindow {
        &mut self.send
    }

    pub fn send_capacity(&self) -> usize {
        self.send.available()
    }

    pub fn consume_send_window(&mut self, amount: usize) -> usize {
        self.send.consume(amount)
    }

    pub fn increase_send_window(&mut self, increment: u32) -> Result<i64> {
        self.send.increase(increment)
    }

    pub fn consume_recv_window(&mut self, amount: usize) -> Result<()> {
        self.recv.receive(amount)
    }

    /// Increment to announce once less than half the receive window is left
    pub fn should_send_window_update(&self) -> Option<u32> {
        let initial = i64::from(self.recv.initial_size());
        let left = self.recv.size();
        (left < initial / 2).then(|| (initial - left) as u32)
    }

    /// Credit the receive window with an increment just announced
    pub fn send_window_update(&mut self, increment: u32) -> Result<i64> {
        self.recv.increase(increment)
    }
}
