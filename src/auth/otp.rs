//! Input models for phone sign-in: the phone number field and the six-slot
//! one-time code widget.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Digits in a national phone number (no country code).
pub const PHONE_NUMBER_LEN: usize = 10;
/// Slots in a one-time code.
pub const OTP_LEN: usize = 6;

/// Input that can be rejected before any network call is made.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("phone number must have exactly {expected} digits, got {actual}")]
    PhoneNumberLength { expected: usize, actual: usize },
    #[error("'{0}' is not a digit")]
    NonDigit(char),
    #[error("code slot {0} is out of range")]
    SlotOutOfRange(usize),
    #[error("code is incomplete: {filled} of {expected} digits entered")]
    IncompleteCode { filled: usize, expected: usize },
}

/// A validated national phone number of exactly [`PHONE_NUMBER_LEN`] ASCII digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PhoneNumber(String);

impl PhoneNumber {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        if let Some(c) = input.chars().find(|c| !c.is_ascii_digit()) {
            return Err(ValidationError::NonDigit(c));
        }
        if input.len() != PHONE_NUMBER_LEN {
            return Err(ValidationError::PhoneNumberLength {
                expected: PHONE_NUMBER_LEN,
                actual: input.len(),
            });
        }
        Ok(Self(input.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Formats the number in E.164 with the given country code, e.g. `+91`.
    pub fn with_country_code(&self, country_code: &str) -> String {
        let code = country_code.trim_start_matches('+');
        format!("+{}{}", code, self.0)
    }
}

impl FromStr for PhoneNumber {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The one-time code being typed, one digit per slot, plus the slot that
/// should have input focus.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OneTimeCode {
    slots: [Option<char>; OTP_LEN],
    focus: usize,
}

impl OneTimeCode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slots(&self) -> &[Option<char>; OTP_LEN] {
        &self.slots
    }

    pub fn focus(&self) -> usize {
        self.focus
    }

    pub fn filled(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_complete(&self) -> bool {
        self.filled() == OTP_LEN
    }

    pub fn is_empty(&self) -> bool {
        self.filled() == 0
    }

    /// Writes `input` into slot `index`.
    ///
    /// An empty `input` clears the slot and leaves focus where it is. A
    /// single digit fills the slot and moves focus to the next one. Several
    /// digits (a pasted code) fill consecutive slots starting at `index`;
    /// anything past the last slot is dropped. Focus never leaves `0..OTP_LEN`.
    pub fn set_digit(&mut self, index: usize, input: &str) -> Result<(), ValidationError> {
        if index >= OTP_LEN {
            return Err(ValidationError::SlotOutOfRange(index));
        }
        if let Some(c) = input.chars().find(|c| !c.is_ascii_digit()) {
            return Err(ValidationError::NonDigit(c));
        }

        if input.is_empty() {
            self.slots[index] = None;
            self.focus = index;
            return Ok(());
        }

        let mut last = index;
        for (slot, digit) in (index..OTP_LEN).zip(input.chars()) {
            self.slots[slot] = Some(digit);
            last = slot;
        }
        self.focus = (last + 1).min(OTP_LEN - 1);
        Ok(())
    }

    /// Handles a backspace key press in slot `index`: a filled slot is
    /// cleared, an empty slot hands focus to the previous one.
    pub fn backspace(&mut self, index: usize) -> Result<(), ValidationError> {
        if index >= OTP_LEN {
            return Err(ValidationError::SlotOutOfRange(index));
        }

        if self.slots[index].is_some() {
            self.slots[index] = None;
            self.focus = index;
        } else {
            self.focus = index.saturating_sub(1);
        }
        Ok(())
    }

    /// The code with slot 0 as the most significant digit.
    pub fn code(&self) -> Result<String, ValidationError> {
        if !self.is_complete() {
            return Err(ValidationError::IncompleteCode {
                filled: self.filled(),
                expected: OTP_LEN,
            });
        }
        Ok(self.slots.iter().flatten().collect())
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phone_number_requires_ten_digits() {
        assert!(PhoneNumber::parse("9876543210").is_ok());
        assert_eq!(
            PhoneNumber::parse("987654321"),
            Err(ValidationError::PhoneNumberLength { expected: 10, actual: 9 })
        );
        assert_eq!(
            PhoneNumber::parse("98765432100"),
            Err(ValidationError::PhoneNumberLength { expected: 10, actual: 11 })
        );
        assert_eq!(PhoneNumber::parse("98765-3210"), Err(ValidationError::NonDigit('-')));
        // Non-ASCII digits are rejected even though they are numeric.
        assert_eq!(PhoneNumber::parse("٩٨٧٦٥٤٣٢١٠"), Err(ValidationError::NonDigit('٩')));
    }

    #[test]
    fn test_country_code_formatting() {
        let number: PhoneNumber = "9876543210".parse().unwrap();
        assert_eq!(number.with_country_code("+91"), "+919876543210");
        assert_eq!(number.with_country_code("1"), "+19876543210");
    }

    #[test]
    fn test_typing_advances_focus_and_stops_at_last_slot() {
        let mut otp = OneTimeCode::new();
        let mut focus = vec![otp.focus()];
        for (i, d) in ["4", "2", "1", "0", "0", "0"].iter().enumerate() {
            otp.set_digit(i, d).unwrap();
            focus.push(otp.focus());
        }
        assert_eq!(focus, vec![0, 1, 2, 3, 4, 5, 5]);
        assert_eq!(otp.code().unwrap(), "421000");
    }

    #[test]
    fn test_backspace_moves_focus_back_without_wrapping() {
        let mut otp = OneTimeCode::new();
        otp.set_digit(0, "7").unwrap();

        otp.backspace(1).unwrap();
        assert_eq!(otp.focus(), 0);
        assert_eq!(otp.slots()[0], Some('7'));

        otp.backspace(0).unwrap();
        assert_eq!(otp.slots()[0], None);
        assert_eq!(otp.focus(), 0);

        otp.backspace(0).unwrap();
        assert_eq!(otp.focus(), 0);
    }

    #[test]
    fn test_clearing_a_slot_keeps_focus() {
        let mut otp = OneTimeCode::new();
        otp.set_digit(3, "5").unwrap();
        otp.set_digit(3, "").unwrap();
        assert_eq!(otp.focus(), 3);
        assert!(otp.is_empty());
    }

    #[test]
    fn test_paste_fills_consecutive_slots() {
        let mut otp = OneTimeCode::new();
        otp.set_digit(2, "98765").unwrap();
        assert_eq!(otp.slots(), &[None, None, Some('9'), Some('8'), Some('7'), Some('6')]);
        assert_eq!(otp.focus(), 5);
    }

    #[test]
    fn test_invalid_input_is_rejected() {
        let mut otp = OneTimeCode::new();
        assert_eq!(otp.set_digit(6, "1"), Err(ValidationError::SlotOutOfRange(6)));
        assert_eq!(otp.set_digit(0, "a"), Err(ValidationError::NonDigit('a')));
        assert_eq!(otp.backspace(9), Err(ValidationError::SlotOutOfRange(9)));
        assert!(otp.is_empty());
    }

    #[test]
    fn test_incomplete_code_is_rejected() {
        let mut otp = OneTimeCode::new();
        otp.set_digit(0, "12345").unwrap();
        assert_eq!(
            otp.code(),
            Err(ValidationError::IncompleteCode { filled: 5, expected: 6 })
        );
    }
}
