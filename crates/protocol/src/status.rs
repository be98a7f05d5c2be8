//! Status codes returned by the helper in the `status` field.
//!
//! The table follows the JSON Wire Protocol numbering the helper program was
//! written against. Codes outside the table map to [`StatusKind::UnknownError`].

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusKind {
	Success,
	NoSuchDriver,
	NoSuchElement,
	NoSuchFrame,
	UnknownCommand,
	StaleElementReference,
	ElementNotVisible,
	InvalidElementState,
	UnknownError,
	ElementIsNotSelectable,
	JavaScriptError,
	XPathLookupError,
	Timeout,
	NoSuchWindow,
	InvalidCookieDomain,
	UnableToSetCookie,
	UnexpectedAlertOpen,
	NoAlertOpen,
	ScriptTimeout,
	InvalidElementCoordinates,
	ImeNotAvailable,
	ImeEngineActivationFailed,
	InvalidSelector,
	SessionNotCreated,
	MoveTargetOutOfBounds,
	NoSuchContext,
	InvalidXPathSelector,
	InvalidXPathSelectorReturnType,
	MethodNotAllowed,
}

const TABLE: &[(i64, StatusKind, &str)] = &[
	(0, StatusKind::Success, "The command executed successfully."),
	(6, StatusKind::NoSuchDriver, "A session is either terminated or not started"),
	(7, StatusKind::NoSuchElement, "An element could not be located on the page using the given search parameters."),
	(8, StatusKind::NoSuchFrame, "A request to switch to a frame could not be satisfied because the frame could not be found."),
	(9, StatusKind::UnknownCommand, "The requested resource could not be found, or a request was received using an HTTP method that is not supported by the mapped resource."),
	(10, StatusKind::StaleElementReference, "An element command failed because the referenced element is no longer attached to the DOM."),
	(11, StatusKind::ElementNotVisible, "An element command could not be completed because the element is not visible on the page."),
	(12, StatusKind::InvalidElementState, "An element command could not be completed because the element is in an invalid state."),
	(13, StatusKind::UnknownError, "An unknown server-side error occurred while processing the command."),
	(15, StatusKind::ElementIsNotSelectable, "An attempt was made to select an element that cannot be selected."),
	(17, StatusKind::JavaScriptError, "An error occurred while executing user supplied JavaScript."),
	(19, StatusKind::XPathLookupError, "An error occurred while searching for an element by XPath."),
	(21, StatusKind::Timeout, "An operation did not complete before its timeout expired."),
	(23, StatusKind::NoSuchWindow, "A request to switch to a different window could not be satisfied because the window could not be found."),
	(24, StatusKind::InvalidCookieDomain, "An illegal attempt was made to set a cookie under a different domain than the current page."),
	(25, StatusKind::UnableToSetCookie, "A request to set a cookie's value could not be satisfied."),
	(26, StatusKind::UnexpectedAlertOpen, "A modal dialog was open, blocking this operation"),
	(27, StatusKind::NoAlertOpen, "An attempt was made to operate on a modal dialog when one was not open."),
	(28, StatusKind::ScriptTimeout, "A script did not complete before its timeout expired."),
	(29, StatusKind::InvalidElementCoordinates, "The coordinates provided to an interactions operation are invalid."),
	(30, StatusKind::ImeNotAvailable, "IME was not available."),
	(31, StatusKind::ImeEngineActivationFailed, "An IME engine could not be started."),
	(32, StatusKind::InvalidSelector, "Argument was an invalid selector (e.g. XPath/CSS)."),
	(33, StatusKind::SessionNotCreated, "A new session could not be created."),
	(34, StatusKind::MoveTargetOutOfBounds, "Target provided for a move action is out of bounds."),
	(35, StatusKind::NoSuchContext, "No such context found."),
	(51, StatusKind::InvalidXPathSelector, "The XPath selector is invalid."),
	(52, StatusKind::InvalidXPathSelectorReturnType, "The XPath selector did not return an element."),
	(405, StatusKind::MethodNotAllowed, "The requested method is not allowed."),
];

impl StatusKind {
	/// Looks up a status code; unknown codes become [`StatusKind::UnknownError`].
	pub fn from_code(code: i64) -> Self {
		TABLE
			.iter()
			.find(|(c, _, _)| *c == code)
			.map(|(_, kind, _)| *kind)
			.unwrap_or(StatusKind::UnknownError)
	}

	pub fn code(self) -> i64 {
		TABLE.iter().find(|(_, kind, _)| *kind == self).map(|(c, _, _)| *c).unwrap_or(13)
	}

	pub fn default_message(self) -> &'static str {
		TABLE.iter().find(|(_, kind, _)| *kind == self).map(|(_, _, msg)| *msg).unwrap_or("")
	}
}

impl fmt::Display for StatusKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Debug::fmt(self, f)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn known_codes_map_to_kinds() {
		assert_eq!(StatusKind::from_code(0), StatusKind::Success);
		assert_eq!(StatusKind::from_code(7), StatusKind::NoSuchElement);
		assert_eq!(StatusKind::from_code(35), StatusKind::NoSuchContext);
		assert_eq!(StatusKind::from_code(405), StatusKind::MethodNotAllowed);
	}

	#[test]
	fn unknown_codes_fall_back_to_unknown_error() {
		assert_eq!(StatusKind::from_code(14), StatusKind::UnknownError);
		assert_eq!(StatusKind::from_code(-1), StatusKind::UnknownError);
	}

	#[test]
	fn codes_round_trip_through_table() {
		for (code, kind, _) in TABLE {
			assert_eq!(kind.code(), *code);
		}
	}
}
