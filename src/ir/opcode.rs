//! Block opcodes.
//!
//! Opcodes use the host's wire names (`control_if`, `data_setvariableto`, ...). Opcodes
//! this crate has no special knowledge of are kept verbatim in [`Opcode::Other`] and
//! are treated as opaque leaf statements or reporters.

use std::fmt;

use strum::{EnumString, IntoStaticStr};

/// The operation a block performs.
///
/// # Examples
///
/// ```rust
/// use tangle::ir::Opcode;
///
/// assert_eq!("control_if".parse::<Opcode>().unwrap(), Opcode::If);
/// assert_eq!(Opcode::If.as_str(), "control_if");
///
/// let custom: Opcode = "pen_clear".parse().unwrap();
/// assert_eq!(custom, Opcode::Other("pen_clear".to_string()));
/// assert_eq!(custom.as_str(), "pen_clear");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, EnumString, IntoStaticStr)]
pub enum Opcode {
    // Hats
    /// `when green flag clicked`
    #[strum(serialize = "event_whenflagclicked")]
    WhenFlagClicked,
    /// `when I receive <channel>`
    #[strum(serialize = "event_whenbroadcastreceived")]
    WhenBroadcastReceived,
    /// `when <key> key pressed`
    #[strum(serialize = "event_whenkeypressed")]
    WhenKeyPressed,
    /// `when this sprite clicked`
    #[strum(serialize = "event_whenthisspriteclicked")]
    WhenThisSpriteClicked,
    /// `when I start as a clone`
    #[strum(serialize = "control_start_as_clone")]
    StartAsClone,
    /// `define <prototype>`
    #[strum(serialize = "procedures_definition")]
    ProcedureDefinition,

    // Control
    /// `if <cond> then`
    #[strum(serialize = "control_if")]
    If,
    /// `if <cond> then else`
    #[strum(serialize = "control_if_else")]
    IfElse,
    /// `repeat (n)`
    #[strum(serialize = "control_repeat")]
    Repeat,
    /// `forever`
    #[strum(serialize = "control_forever")]
    Forever,
    /// `repeat until <cond>`
    #[strum(serialize = "control_repeat_until")]
    RepeatUntil,
    /// `while <cond>`
    #[strum(serialize = "control_while")]
    While,
    /// `for each [var] in (n)`
    #[strum(serialize = "control_for_each")]
    ForEach,
    /// `wait (n) seconds`
    #[strum(serialize = "control_wait")]
    Wait,
    /// `wait until <cond>`
    #[strum(serialize = "control_wait_until")]
    WaitUntil,
    /// `stop [all | this script | other scripts in sprite]`
    #[strum(serialize = "control_stop")]
    Stop,
    /// `create clone of <target>`
    #[strum(serialize = "control_create_clone_of")]
    CreateCloneOf,
    /// `delete this clone`
    #[strum(serialize = "control_delete_this_clone")]
    DeleteThisClone,

    // Events
    /// `broadcast <channel>`
    #[strum(serialize = "event_broadcast")]
    Broadcast,
    /// `broadcast <channel> and wait`
    #[strum(serialize = "event_broadcastandwait")]
    BroadcastAndWait,
    /// Channel menu shadow.
    #[strum(serialize = "event_broadcast_menu")]
    BroadcastMenu,

    // Data
    /// `set [var] to (value)`
    #[strum(serialize = "data_setvariableto")]
    SetVariableTo,
    /// `change [var] by (value)`
    #[strum(serialize = "data_changevariableby")]
    ChangeVariableBy,
    /// `add (item) to [list]`
    #[strum(serialize = "data_addtolist")]
    AddToList,
    /// `delete (index) of [list]`
    #[strum(serialize = "data_deleteoflist")]
    DeleteOfList,
    /// `delete all of [list]`
    #[strum(serialize = "data_deletealloflist")]
    DeleteAllOfList,
    /// `insert (item) at (index) of [list]`
    #[strum(serialize = "data_insertatlist")]
    InsertAtList,
    /// `replace item (index) of [list] with (item)`
    #[strum(serialize = "data_replaceitemoflist")]
    ReplaceItemOfList,
    /// `(item (index) of [list])`
    #[strum(serialize = "data_itemoflist")]
    ItemOfList,
    /// `(item # of (item) in [list])`
    #[strum(serialize = "data_itemnumoflist")]
    ItemNumOfList,
    /// `(length of [list])`
    #[strum(serialize = "data_lengthoflist")]
    LengthOfList,
    /// `<[list] contains (item)?>`
    #[strum(serialize = "data_listcontainsitem")]
    ListContainsItem,

    // Operators
    /// `(a + b)`
    #[strum(serialize = "operator_add")]
    Add,
    /// `(a - b)`
    #[strum(serialize = "operator_subtract")]
    Subtract,
    /// `(a * b)`
    #[strum(serialize = "operator_multiply")]
    Multiply,
    /// `(a / b)`
    #[strum(serialize = "operator_divide")]
    Divide,
    /// `<a < b>`
    #[strum(serialize = "operator_lt")]
    LessThan,
    /// `<a > b>`
    #[strum(serialize = "operator_gt")]
    GreaterThan,
    /// `<a = b>`
    #[strum(serialize = "operator_equals")]
    Equals,
    /// `<a and b>`
    #[strum(serialize = "operator_and")]
    And,
    /// `<a or b>`
    #[strum(serialize = "operator_or")]
    Or,
    /// `<not a>`
    #[strum(serialize = "operator_not")]
    Not,
    /// `(join a b)`
    #[strum(serialize = "operator_join")]
    Join,
    /// `(letter (n) of (text))`
    #[strum(serialize = "operator_letter_of")]
    LetterOf,
    /// `(length of (text))`
    #[strum(serialize = "operator_length")]
    Length,
    /// `<(text) contains (text)?>`
    #[strum(serialize = "operator_contains")]
    Contains,
    /// `(a mod b)`
    #[strum(serialize = "operator_mod")]
    Mod,
    /// `(round a)`
    #[strum(serialize = "operator_round")]
    Round,
    /// `([op] of (a))`
    #[strum(serialize = "operator_mathop")]
    MathOp,
    /// `(pick random (a) to (b))`
    #[strum(serialize = "operator_random")]
    Random,

    // Procedures
    /// Procedure signature shadow under a definition.
    #[strum(serialize = "procedures_prototype")]
    ProcedurePrototype,
    /// Procedure invocation.
    #[strum(serialize = "procedures_call")]
    ProcedureCall,
    /// Procedure argument reporter (text/number).
    #[strum(serialize = "argument_reporter_string_number")]
    ArgumentReporter,
    /// Procedure argument reporter (boolean).
    #[strum(serialize = "argument_reporter_boolean")]
    ArgumentReporterBoolean,

    // Looks
    /// `say (message)`
    #[strum(serialize = "looks_say")]
    Say,

    /// Any opcode without special treatment.
    #[strum(default)]
    Other(String),
}

impl Opcode {
    /// Returns the wire name of this opcode.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Opcode::Other(name) => name,
            known => known.into(),
        }
    }

    /// Returns true for blocks that start a script.
    #[must_use]
    pub fn is_hat(&self) -> bool {
        match self {
            Opcode::WhenFlagClicked
            | Opcode::WhenBroadcastReceived
            | Opcode::WhenKeyPressed
            | Opcode::WhenThisSpriteClicked
            | Opcode::StartAsClone
            | Opcode::ProcedureDefinition => true,
            Opcode::Other(name) => name.starts_with("event_when"),
            _ => false,
        }
    }

    /// Returns true for statements that nest or suspend control flow.
    ///
    /// `control_stop` is only partially a control statement: the
    /// `other scripts in sprite` variant keeps running and is a plain leaf.
    /// Callers that care inspect the `STOP_OPTION` field.
    #[must_use]
    pub fn is_control(&self) -> bool {
        matches!(
            self,
            Opcode::If
                | Opcode::IfElse
                | Opcode::Repeat
                | Opcode::Forever
                | Opcode::RepeatUntil
                | Opcode::While
                | Opcode::ForEach
                | Opcode::Wait
                | Opcode::WaitUntil
                | Opcode::Stop
                | Opcode::DeleteThisClone
                | Opcode::BroadcastAndWait
        )
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_opcodes_round_trip_through_wire_names() -> Result<(), strum::ParseError> {
        for opcode in [Opcode::If, Opcode::SetVariableTo, Opcode::ProcedureCall] {
            assert_eq!(opcode.as_str().parse::<Opcode>()?, opcode);
        }
        Ok(())
    }

    #[test]
    fn test_unknown_opcode_is_preserved() -> Result<(), strum::ParseError> {
        let opcode: Opcode = "music_playDrumForBeats".parse()?;
        assert_eq!(opcode.as_str(), "music_playDrumForBeats");
        assert!(!opcode.is_control());
        assert!(!opcode.is_hat());
        Ok(())
    }

    #[test]
    fn test_hat_classification() -> Result<(), strum::ParseError> {
        assert!(Opcode::WhenFlagClicked.is_hat());
        assert!(Opcode::ProcedureDefinition.is_hat());
        assert!("event_whengreaterthan".parse::<Opcode>()?.is_hat());
        assert!(!Opcode::Say.is_hat());
        Ok(())
    }
}
