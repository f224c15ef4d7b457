//! Enum table discovery: constructor names to declaration-order indices,
//! merged across every enum the module defines.

use lode_syntax::ast::{EnumTypeDefn, Program, Type};
use lode_syntax::hlir::EnumMap;

/// Records the constructors of `e` in declaration order.
pub fn register_enum(map: &mut EnumMap, e: &EnumTypeDefn) {
    for (i, option) in e.options.iter().enumerate() {
        map.insert(option.constructor.clone(), i as u32);
    }
}

/// Scans the program's type definitions for enums, including enums
/// reachable through aliases.
pub fn enum_table(program: &Program) -> EnumMap {
    let mut map = EnumMap::default();
    for defn in program.type_definitions() {
        if let Some(e) = enum_of(&defn.typ) {
            register_enum(&mut map, e);
        }
    }
    map
}

fn enum_of(ty: &Type) -> Option<&EnumTypeDefn> {
    match ty {
        Type::Enum(e) => Some(e),
        Type::Alias { base, .. } => enum_of(base),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lode_syntax::ast::{EnumOption, Item, TypeDefn};

    fn colour() -> EnumTypeDefn {
        EnumTypeDefn {
            name: "Colour".to_string(),
            options: ["Red", "Green", "Blue"]
                .iter()
                .map(|c| EnumOption {
                    constructor: c.to_string(),
                    params: vec![],
                })
                .collect(),
        }
    }

    #[test]
    fn indices_follow_declaration_order() {
        let program = Program {
            items: vec![
                Item::TypeDefn(TypeDefn {
                    name: "Colour".to_string(),
                    typ: Type::Enum(colour()),
                }),
                Item::TypeDefn(TypeDefn {
                    name: "Age".to_string(),
                    typ: Type::Int,
                }),
            ],
        };
        let map = enum_table(&program);
        assert_eq!(map.get("Red"), Some(0));
        assert_eq!(map.get("Blue"), Some(2));
        assert_eq!(map.len(), 3);
    }
}
