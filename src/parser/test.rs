use super::{parse, parse_program};

fn parse_tree_matches(input: &str, tree_repr: &str) {
    match parse(input) {
        Ok(stmt) => {
            let result_repr = format!("{stmt:?}");
            assert!(
                result_repr.contains(tree_repr),
                "\nFailed to parse \"{}\":\nexpected \"{}\" somewhere in \"{}\"\n",
                input,
                tree_repr,
                result_repr
            )
        }
        Err(err) => panic!("\nFailed to parse \"{input}\": {err}\n"),
    }
}

fn assert_raises_error(input: &str, msg: &str) {
    match parse(input) {
        Ok(stmt) => panic!("\nExpected \"{input}\" to fail, got {stmt:?}\n"),
        Err(err) => assert_eq!(msg, err.message()),
    }
}

#[test]
fn test_binding() {
    parse_tree_matches("$x: 5;", "Binding");
    parse_tree_matches("$x: 5;", "Number(5.0)");
    parse_tree_matches("$greeting: \"hello\";", "Text(\"hello\")");
}

#[test]
fn test_empty_binding() {
    parse_tree_matches("$x: ;", "value: None");
}

#[test]
fn test_dashed_keynames() {
    parse_tree_matches("$is-valid: 1;", "\"$is-valid\"");
    parse_tree_matches("$not-done: 0;", "\"$not-done\"");
}

#[test]
fn test_rebind_leftward() {
    parse_tree_matches("$x <: 6;", "Rebind");
}

#[test]
fn test_rebind_rightward() {
    parse_tree_matches("6 :> $x;", "Rebind");
}

#[test]
fn test_rebind_target_validation() {
    assert_raises_error("1 + 1 <: 2;", "error: invalid rebind target");
    assert_raises_error("5 :> 1 + 1;", "error: invalid rebind target");
}

#[test]
fn test_arithmetic_precedence() {
    parse_tree_matches("1 + 2 * 3;", "Mul");
    parse_tree_matches(
        "1 + 2 * 3;",
        "Binary { op: Add, left: Number(1.0)",
    );
}

#[test]
fn test_negative_number() {
    parse_tree_matches("-5;", "Number(-5.0)");
    assert_raises_error("--5;", "error: double minus not allowed");
}

#[test]
fn test_list_atom() {
    parse_tree_matches("[1, 2, 3];", "ListAtom");
    parse_tree_matches("[x: 1, 2];", "KeyValue { key: \"x\"");
}

#[test]
fn test_list_comma_errors() {
    assert_raises_error("[,];", "error: empty list with just a comma");
    assert_raises_error("[, 1];", "error: excess leading comma");
    assert_raises_error("[1,, 2];", "error: double comma in list");
    assert_raises_error("[1, 2,];", "error: excess trailing comma");
}

#[test]
fn test_numeric_key_rejected() {
    assert_raises_error("[1: 2];", "error: key names cannot be purely numeric");
    assert_raises_error("{1: 2};", "error: key names cannot be purely numeric");
}

#[test]
fn test_unmatched_bracket() {
    assert_raises_error("[1, 2", "error: unmatched bracket");
    assert_raises_error("{a: 1", "error: unmatched brace");
}

#[test]
fn test_list_spread() {
    parse_tree_matches("[<$front>, 3];", "Spread");
}

#[test]
fn test_table_atom() {
    parse_tree_matches("{name: \"Ada\", age: 36};", "TableAtom");
}

#[test]
fn test_property_and_index() {
    parse_tree_matches("$l.key;", "Property");
    parse_tree_matches("$l.1;", "Index");
    parse_tree_matches("$l.$i;", "VarInvoke(\"$i\")");
}

#[test]
fn test_chained_numeric_index() {
    // `.1.2` arrives as one number token but means two index steps
    parse_tree_matches("$l.1.2;", "Index { base: Index");
}

#[test]
fn test_unpack_postfix() {
    parse_tree_matches("$l[];", "Unpack");
}

#[test]
fn test_function_atom() {
    parse_tree_matches("($x + 1);", "FunctionAtom");
    parse_tree_matches("(param $n: 0; $n * 2);", "Param { name: \"$n\"");
}

#[test]
fn test_duplicate_param() {
    assert_raises_error(
        "(param $x: 1; param $x: 2; $x);",
        "error: duplicate parameter name: $x",
    );
}

#[test]
fn test_param_after_body() {
    assert_raises_error(
        "($x + 1; param $x: 1; $x);",
        "error: param declarations must come before the function body",
    );
}

#[test]
fn test_multiline_function_needs_return() {
    assert_raises_error(
        "(\nparam $x: 1;\n$x + 1;\n);",
        "error: multi-line function atom requires an explicit return",
    );
    parse_tree_matches("(\nparam $x: 1;\nreturn $x + 1;\n);", "Return");
}

#[test]
fn test_param_outside_function() {
    match parse_program("param $x: 1;") {
        Err(err) => assert_eq!(
            "error: param declaration outside function atom",
            err.message()
        ),
        Ok(tree) => panic!("expected failure, got {tree:?}"),
    }
}

#[test]
fn test_param_not_allowed_in_blocks() {
    assert_raises_error(
        "If 1, ( param $x: 1; );",
        "error: param declaration outside function atom",
    );
    // nested blocks inside a function atom are not its statement list
    assert_raises_error(
        "(param $x: 1; If $x, ( param $y: 2; ); $x);",
        "error: param declaration outside function atom",
    );
}

#[test]
fn test_function_ref() {
    parse_tree_matches("@double;", "FunctionRef(\"double\")");
}

#[test]
fn test_invocation() {
    parse_tree_matches("$double(5);", "Invoke");
    parse_tree_matches("$add(2, 3);", "args: [Number(2.0), Number(3.0)]");
}

#[test]
fn test_if_statement() {
    parse_tree_matches("If $x is 5, ( \"five\"; );", "If(IfStatement");
    parse_tree_matches("If $x is 5, ( 1; ); Else, ( 2; );", "else_block: Some");
}

#[test]
fn test_else_if_chain() {
    parse_tree_matches(
        "If $x is 1, (1;); Else if $x is 2, (2;); Else, (3;);",
        "exclusive: true",
    );
}

#[test]
fn test_or_branches_are_inclusive() {
    parse_tree_matches("If $x > 0, (1;), or $x > 1, (2;);", "exclusive: false");
}

#[test]
fn test_either_form_is_exclusive() {
    parse_tree_matches(
        "either $x is 1, (1;), or $x is 2, (2;);",
        "exclusive: true",
    );
}

#[test]
fn test_bare_loop() {
    parse_tree_matches("Loop, ( end-loop; );", "Bare");
    parse_tree_matches("Loop, ( end-loop; );", "EndLoop");
}

#[test]
fn test_while_loop() {
    parse_tree_matches("Loop while $x < 5, ( $x <: $x + 1; );", "While");
}

#[test]
fn test_for_loop() {
    parse_tree_matches("Loop for $item in $list, ( $item; );", "var: \"$item\"");
    parse_tree_matches(
        "Loop for item in $list, ( $item; );",
        "var: \"$item\"",
    );
}

#[test]
fn test_for_loop_by_reference() {
    parse_tree_matches(
        "Loop for @cell in $grid, ( $cell <: 0; );",
        "by_reference: true",
    );
}

#[test]
fn test_loop_signals() {
    parse_tree_matches("restart-loop;", "RestartLoop");
}

#[test]
fn test_variant_group() {
    parse_tree_matches(
        "Color variants: Red, Green, Blue;",
        "VariantGroupDef { group: \"Color\"",
    );
    parse_tree_matches("Phase variants: Loading, or Done;", "\"Done\"");
    assert_raises_error(
        "$Color variants: Red;",
        "error: variant group names do not take '$'",
    );
}

#[test]
fn test_variant_access() {
    parse_tree_matches("Color.Red;", "Property");
}

#[test]
fn test_destructure() {
    parse_tree_matches("$a, $b: $pair[];", "Destructure");
    parse_tree_matches(
        "$a -> $first, $b: $pair[];",
        "rename: Some(\"$first\")",
    );
}

#[test]
fn test_duplicate_destructure_target() {
    assert_raises_error(
        "$a, $a: $pair[];",
        "error: duplicate destructure target: $a",
    );
}

#[test]
fn test_reverse_destructure() {
    parse_tree_matches("$pair[] :> $a, $b;", "ReverseDestructure");
}

#[test]
fn test_pipeline() {
    parse_tree_matches("$x then $this + 1;", "Pipeline");
    parse_tree_matches("$x then $this + 1 then $this * 2;", "stages");
}

#[test]
fn test_comparison_keyword_not_a_stage() {
    assert_raises_error(
        "$x then is 5;",
        "error: 'is' cannot be used as a pipeline stage",
    );
    assert_raises_error(
        "$x then contains 5;",
        "error: 'contains' cannot be used as a pipeline stage",
    );
}

#[test]
fn test_conditional_pipeline_stage() {
    parse_tree_matches(
        "$x then If $this > 3, ( $this - 1; );",
        "Conditional",
    );
}

#[test]
fn test_blueprint_atom() {
    parse_tree_matches(
        "Person: <[ name: \"\", age: 0 ]>;",
        "BlueprintAtom",
    );
}

#[test]
fn test_blueprint_instantiation() {
    parse_tree_matches(
        "Person[name: \"Ada\"];",
        "BlueprintInstantiate { name: \"Person\"",
    );
}

#[test]
fn test_interpolation_checked_at_parse_time() {
    parse_tree_matches("\"total: <$x + 1>\";", "Text");
    assert_raises_error("\"oops >\";", "error: malformed interpolation");
    assert_raises_error(
        "\"off by <$one\";",
        "error: unterminated interpolation in text atom",
    );
}

#[test]
fn test_comparisons() {
    parse_tree_matches("$x is not 5;", "IsNot");
    parse_tree_matches("$l contains 3;", "Contains");
    parse_tree_matches("$x <= 5;", "LessEqual");
    parse_tree_matches("$x != 5;", "IsNot");
}

#[test]
fn test_extra_semicolon() {
    assert_raises_error(";", "error: extra semicolon");
}

#[test]
fn test_unclosed_block_comment() {
    assert_raises_error("/' this never ends", "error: unclosed block comment");
}

#[test]
fn test_unterminated_string() {
    assert_raises_error("\"no closing quote", "error: unterminated string");
}

#[test]
fn test_unexpected_character() {
    assert_raises_error("§;", "Syntax error: Unexpected character '§'");
}

#[test]
fn test_unmatched_paren_in_block() {
    assert_raises_error("If 1, ( 2;", "error: unmatched parenthesis");
}

#[test]
fn test_error_carries_source_line() {
    let err = parse("$x: [1, 2,];").unwrap_err();
    assert_eq!(Some("$x: [1, 2,];"), err.code_line());
}

#[test]
fn test_multiline_statement_reconstruction() {
    let err = parse("$nums:\n  [1,\n  2,];").unwrap_err();
    assert_eq!("error: excess trailing comma", err.message());
}

#[test]
fn test_program_parses_statement_sequence() {
    let program = parse_program("$x: 1; $y: 2; $x + $y;").unwrap();
    assert_eq!(3, program.statements.len());
}
