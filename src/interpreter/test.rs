use super::environment::Scope;
use super::error::RuntimeError;
use super::evaluate_program;
use super::value::Value;
use crate::parser::parse_program;

fn eval_source(input: &str) -> Result<Value, RuntimeError> {
    let program = parse_program(input).unwrap_or_else(|err| panic!("\nparse failure: {err}\n"));
    let env = Scope::root();
    evaluate_program(&program, &env)
}

fn assert_evaluates_to(input: &str, expected: &str) {
    match eval_source(input) {
        Ok(value) => assert_eq!(
            expected,
            value.to_string(),
            "\nwhile evaluating \"{input}\"\n"
        ),
        Err(err) => panic!("\nFailed to evaluate \"{input}\": {err}\n"),
    }
}

fn assert_runtime_error(input: &str, msg: &str) {
    match eval_source(input) {
        Ok(value) => panic!("\nExpected \"{input}\" to fail, got {value}\n"),
        Err(err) => assert_eq!(msg, err.to_string()),
    }
}

#[test]
fn test_arithmetic() {
    assert_evaluates_to("1 + 2 * 3;", "7");
    assert_evaluates_to("10 / 4;", "2.5");
    assert_evaluates_to("-5 + 3;", "-2");
}

#[test]
fn test_binding_and_lookup() {
    assert_evaluates_to("$x: 5; $x + 1;", "6");
    assert_evaluates_to("$greeting: \"hello\"; $greeting;", "hello");
}

#[test]
fn test_already_defined() {
    assert_runtime_error("$x: 1; $x: 2;", "error: $x already defined");
}

#[test]
fn test_nested_scope_shadows_without_leaking() {
    assert_evaluates_to("$x: 1; If 1, ( $x: 99; $x; ); $x;", "1");
}

#[test]
fn test_rebind_type_lock() {
    assert_runtime_error("$x: 5; \"t\" :> $x;", "error: cannot assign Text to Number");
    assert_evaluates_to("$x: 5; 6 :> $x; $x;", "6");
}

#[test]
fn test_empty_binding_locks_on_first_value() {
    assert_evaluates_to("$x: ; $x <: \"hi\"; $x;", "hi");
    assert_runtime_error(
        "$x: ; $x <: \"hi\"; $x <: 5;",
        "error: cannot assign Number to Text",
    );
}

#[test]
fn test_rebind_of_unowned_name_degrades_to_binding() {
    assert_evaluates_to("7 :> $fresh; $fresh;", "7");
}

#[test]
fn test_unknown_variable() {
    assert_runtime_error("$nope;", "unknown variable: $nope");
}

#[test]
fn test_text_interpolation() {
    assert_evaluates_to("$name: \"Ada\"; \"hi <$name>!\";", "hi Ada!");
    assert_evaluates_to("\"<2 + 3>\";", "5");
    assert_runtime_error(
        "\"<$ghost>\";",
        "error: interpolation failed: unknown variable: $ghost",
    );
}

#[test]
fn test_interpolation_splices_every_statement() {
    assert_evaluates_to("\"<1 + 2; 3 * 4;>\";", "312");
    assert_evaluates_to("$a: 1; \"<$a; $a + 1;>\";", "12");
}

#[test]
fn test_function_invocation() {
    assert_evaluates_to("$double: (param $x: ; $x * 2); $double(5);", "10");
}

#[test]
fn test_default_parameter() {
    assert_evaluates_to("(param $x: 0; $x * 2)(5);", "10");
    assert_evaluates_to("(param $x: 0; $x * 2)();", "0");
}

#[test]
fn test_zero_arg_auto_invocation() {
    assert_evaluates_to("$greet: (\"hi\"); $greet;", "hi");
    assert_evaluates_to("$one: (1); $one + 2;", "3");
}

#[test]
fn test_function_reference_is_not_invoked() {
    assert_evaluates_to("$greet: (\"hi\"); @greet;", "<function ()>");
}

#[test]
fn test_list_elements_are_auto_invoked() {
    assert_evaluates_to("$f: (41 + 1); $l: [$f]; $l.1;", "42");
    assert_evaluates_to("$f: (5); $t: {v: $f}; $t.v;", "5");
    // a reference keeps the function itself in the list
    assert_evaluates_to("$f: (41 + 1); $l: [@f]; $l.1;", "<function ()>");
}

#[test]
fn test_arguments_are_auto_invoked() {
    assert_evaluates_to("$id: (param $x: ; $x); $seven: (7); $id($seven);", "7");
}

#[test]
fn test_arity_errors() {
    assert_runtime_error(
        "$id: (param $x: ; $x); $id(1, 2);",
        "error: too many arguments: expected 1, got 2",
    );
    assert_runtime_error(
        "$id: (param $x: ; $x); $id();",
        "error: too few arguments: expected 1, got 0",
    );
}

#[test]
fn test_not_a_function() {
    assert_runtime_error("$n: 5; $n(1);", "5 is not a function");
}

#[test]
fn test_recursion_limit() {
    assert_runtime_error(
        "$f: ( $f() ); $f();",
        "error: maximum recursion depth exceeded",
    );
}

#[test]
fn test_if_exclusive_and_inclusive_branches() {
    // `or` without `either` runs every truthy branch
    assert_evaluates_to(
        "$x: 0; If 1 > 0, ( $x <: $x + 1; ), or 2 > 0, ( $x <: $x + 10; ); $x;",
        "11",
    );
    // `either/or` stops at the first truthy branch
    assert_evaluates_to(
        "$x: 0; either 1 > 0, ( $x <: $x + 1; ), or 2 > 0, ( $x <: $x + 10; ); $x;",
        "1",
    );
    assert_evaluates_to("$x: 0; If 0, ( 1; ); Else, ( $x <: 5; ); $x;", "5");
}

#[test]
fn test_while_loop() {
    assert_evaluates_to("$x: 0; Loop while $x < 5, ( $x <: $x + 1; ); $x;", "5");
}

#[test]
fn test_bare_loop_needs_end_loop() {
    assert_evaluates_to(
        "$x: 0; Loop, ( $x <: $x + 1; If $x is 3, ( end-loop; ); ); $x;",
        "3",
    );
}

#[test]
fn test_restart_loop() {
    assert_evaluates_to(
        "$x: 0; $sum: 0; Loop while $x < 4, ( $x <: $x + 1; If $x is 2, ( restart-loop; ); $sum <: $sum + $x; ); $sum;",
        "8",
    );
}

#[test]
fn test_loop_body_bindings_are_fresh_each_iteration() {
    assert_evaluates_to(
        "$x: 0; Loop while $x < 3, ( $x <: $x + 1; $tmp: $x; ); $x;",
        "3",
    );
}

#[test]
fn test_live_iteration_sees_appended_elements() {
    assert_evaluates_to(
        "$l: [1, 2]; $seen: 0; Loop for $x in $l, ( If $x is 2, ( [<$l>, 3] :> $l; ); $seen <: $seen + $x; ); $seen;",
        "6",
    );
}

#[test]
fn test_live_iteration_never_revisits_after_deletion() {
    // Deleting the visited head shifts the list left; the cursor still
    // advances, so nothing is visited twice.
    assert_evaluates_to(
        "$l: [1, 2, 3]; $seen: 0; Loop for $x in $l, ( If $x is 1, ( [2, 3] :> $l; ); $seen <: $seen + $x; ); $seen;",
        "4",
    );
}

#[test]
fn test_by_reference_loop_writes_through() {
    assert_evaluates_to(
        "$grid: [1, 2, 3]; Loop for @cell in $grid, ( $cell <: $cell * 10; ); $grid.2;",
        "20",
    );
}

#[test]
fn test_for_loop_requires_a_list() {
    assert_runtime_error("Loop for $x in 5, ( $x; );", "error: 5 is not a list");
}

#[test]
fn test_end_loop_does_not_cross_call_boundary() {
    assert_runtime_error(
        "$f: ( end-loop ); $l: [1]; Loop for $x in $l, ( $f(); );",
        "error: end-loop used outside of a loop",
    );
}

#[test]
fn test_signal_outside_loop() {
    assert_runtime_error("end-loop;", "error: end-loop used outside of a loop");
    assert_runtime_error("restart-loop;", "error: restart-loop used outside of a loop");
}

#[test]
fn test_list_indexing_is_one_based() {
    assert_evaluates_to("$l: [10, 20, 30]; $l.2;", "20");
    assert_runtime_error("$l: [10, 20]; $l.3;", "error: list index out of range");
    assert_runtime_error("$l: [10, 20]; $l.0;", "error: list index out of range");
}

#[test]
fn test_index_type_errors() {
    assert_runtime_error(
        "$l: [1]; $i: 1.5; $l.$i;",
        "error: index must be an integer",
    );
    assert_runtime_error(
        "$l: [1]; $i: \"one\"; $l.$i;",
        "error: index must be a number (text atoms cannot be used as indices)",
    );
}

#[test]
fn test_keyed_access_and_mutation() {
    assert_evaluates_to("$l: [x: 1, y: 2]; $l.y;", "2");
    assert_evaluates_to("$l: [x: 1]; $l.x <: 5; $l.x;", "5");
    assert_evaluates_to("$l: [1, 2]; $l.1 <: 9; $l.1;", "9");
    assert_runtime_error("$l: [x: 1]; $l.z;", "error: table property not found: z");
}

#[test]
fn test_table_atom() {
    assert_evaluates_to("$t: {name: \"Ada\", age: 36}; $t.age;", "36");
}

#[test]
fn test_spread() {
    assert_evaluates_to("$a: [1, 2]; $b: [<$a>, 3]; $b.3;", "3");
}

#[test]
fn test_structural_equality() {
    assert_evaluates_to("[1, [2, 3]] is [1, [2, 3]];", "True");
    assert_evaluates_to("\"a\" is \"b\";", "False");
    assert_evaluates_to("5 is \"5\";", "False");
    assert_evaluates_to("5 is not 6;", "True");
}

#[test]
fn test_contains() {
    assert_evaluates_to("[1, 2, 3] contains 2;", "True");
    assert_evaluates_to("[1, 2, 3] contains 9;", "False");
    assert_evaluates_to("\"hello\" contains \"ell\";", "True");
}

#[test]
fn test_truthiness() {
    assert_evaluates_to("not 0;", "True");
    assert_evaluates_to("not \"\";", "True");
    // a list is truthy only when some element is truthy
    assert_evaluates_to("not [0, 0];", "True");
    assert_evaluates_to("not [0, 1];", "False");
}

#[test]
fn test_destructuring() {
    assert_evaluates_to("$pair: [1, 2]; $a, $b: $pair[]; $a + $b;", "3");
    assert_evaluates_to("$pair: [1, 2]; $a -> $first, $b: $pair[]; $first;", "1");
    assert_runtime_error(
        "$trio: [1, 2, 3]; $a, $b: $trio[];",
        "error: expected 2 values to unpack, got 3",
    );
}

#[test]
fn test_reverse_destructuring() {
    assert_evaluates_to("$a: 0; $b: 0; [7, 8][] :> $a, $b; $b;", "8");
}

#[test]
fn test_destructure_round_trip_preserves_keys() {
    assert_evaluates_to(
        "$list: [x: 1, y: 2]; $a, $b: $list[]; [$a, $b] :> $list[]; $list.x;",
        "1",
    );
}

#[test]
fn test_variant_groups() {
    assert_evaluates_to("Color variants: Red, Green, Blue; Color.Green;", "Green");
    assert_runtime_error("Color variants: Red; Color.Blue;", "error: Color has no variant Blue");
}

#[test]
fn test_variant_extension_preserves_builtins() {
    assert_evaluates_to("Status variants: Loading; Status.Loading;", "Loading");
    assert_evaluates_to("Status variants: Loading; Status.True;", "True");
}

#[test]
fn test_blueprint_instantiation() {
    assert_evaluates_to(
        "Person: <[ name: \"\", age: 0 ]>; $ada: Person[name: \"Ada\"]; $ada.name;",
        "Ada",
    );
    assert_evaluates_to(
        "Person: <[ name: \"\", age: 0 ]>; $ada: Person[name: \"Ada\"]; $ada.age;",
        "0",
    );
}

#[test]
fn test_unknown_fields_are_accepted() {
    assert_evaluates_to(
        "Person: <[ name: \"\" ]>; $p: Person[name: \"Ada\", extra: 1]; $p.extra;",
        "1",
    );
}

#[test]
fn test_methods_bind_self() {
    assert_evaluates_to(
        "Counter: <[ count: 0, bump: ( $self.count <: $self.count + 1 ) ]>; $c: Counter[]; $c.bump(); $c.count;",
        "1",
    );
}

#[test]
fn test_blueprint_composition() {
    assert_evaluates_to("A: <[ x: 1 ]>; B: <[ y: 2 ]>; C: A and B; C[].y;", "2");
    // the right side wins on collision
    assert_evaluates_to("A: <[ x: 1 ]>; B: <[ x: 9 ]>; C: A and B; C[].x;", "9");
}

#[test]
fn test_pipelines() {
    assert_evaluates_to("5 then $this + 1 then $this * 2;", "12");
    assert_evaluates_to(
        "$inc: (param $n: ; $n + 1); 5 then $inc then $this * 2;",
        "12",
    );
}

#[test]
fn test_conditional_stage_passes_through_when_falsy() {
    assert_evaluates_to("$v: 5; $v then If $this is 0, ( $this + 1; );", "5");
    assert_evaluates_to("$v: 0; $v then If $this is 0, ( $this + 1; );", "1");
}

#[test]
fn test_self_referential_list_is_printable() {
    // rebinding a list into a wrapper of itself makes a cycle; printing
    // must terminate instead of blowing the host stack
    assert_evaluates_to("$l: [1]; [$l] :> $l; $l;", "[[...]]");
    assert_evaluates_to("$l: [1]; [$l, 2] :> $l; $l;", "[[...], 2]");
}

#[test]
fn test_self_referential_list_truthiness_and_equality() {
    assert_evaluates_to("$l: [1]; [$l] :> $l; not $l;", "False");
    assert_evaluates_to("$l: [1]; [$l] :> $l; $l is $l;", "True");
}

#[test]
fn test_instance_display() {
    assert_evaluates_to(
        "Person: <[ name: \"\", age: 0 ]>; Person[name: \"Ada\"];",
        "Person[name: \"Ada\", age: 0]",
    );
}
