//! Nesting of companies, units, departments and positions for display, plus
//! the reparenting guard for the self-referencing company and department links.

use crate::model::organization::{Company, Department, Position, Unit};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PositionNode {
    pub id: u64,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct DepartmentNode {
    pub id: u64,
    pub name: String,
    pub positions: Vec<PositionNode>,
    pub children: Vec<DepartmentNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UnitNode {
    pub id: u64,
    pub name: String,
    pub departments: Vec<DepartmentNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CompanyNode {
    pub id: u64,
    pub name: String,
    pub code: String,
    pub units: Vec<UnitNode>,
    /// Top-level departments not attached to a unit.
    pub departments: Vec<DepartmentNode>,
    pub children: Vec<CompanyNode>,
}

/// True when making `new_parent` the parent of `node` would close a loop,
/// i.e. `new_parent` is `node` itself or one of its descendants.
///
/// `parents` maps every node id to its current parent.
pub fn creates_cycle(node: u64, new_parent: u64, parents: &HashMap<u64, Option<u64>>) -> bool {
    let mut seen = HashSet::new();
    let mut cursor = Some(new_parent);
    while let Some(id) = cursor {
        if id == node {
            return true;
        }
        // existing data already loops; refuse rather than spin
        if !seen.insert(id) {
            return true;
        }
        cursor = parents.get(&id).copied().flatten();
    }
    false
}

fn children_index<T, F>(items: &[T], parent_of: F) -> HashMap<Option<u64>, Vec<&T>>
where
    F: Fn(&T) -> Option<u64>,
{
    let mut index: HashMap<Option<u64>, Vec<&T>> = HashMap::new();
    for item in items {
        index.entry(parent_of(item)).or_default().push(item);
    }
    index
}

struct Builder<'a> {
    company_children: HashMap<Option<u64>, Vec<&'a Company>>,
    units_by_company: HashMap<u64, Vec<&'a Unit>>,
    dept_children: HashMap<Option<u64>, Vec<&'a Department>>,
    positions_by_dept: HashMap<u64, Vec<&'a Position>>,
    dept_ids: HashSet<u64>,
}

impl<'a> Builder<'a> {
    fn department(&self, dept: &Department) -> DepartmentNode {
        DepartmentNode {
            id: dept.id,
            name: dept.name.clone(),
            positions: self
                .positions_by_dept
                .get(&dept.id)
                .map(|ps| {
                    ps.iter()
                        .map(|p| PositionNode { id: p.id, title: p.title.clone() })
                        .collect()
                })
                .unwrap_or_default(),
            children: self
                .dept_children
                .get(&Some(dept.id))
                .map(|cs| cs.iter().map(|c| self.department(c)).collect())
                .unwrap_or_default(),
        }
    }

    /// Departments with no (known) parent department hang off a unit or the company.
    fn is_root_department(&self, dept: &Department) -> bool {
        dept.parent_id.is_none_or(|p| !self.dept_ids.contains(&p))
    }

    fn company(&self, company: &Company, all_depts: &[Department]) -> CompanyNode {
        let roots: Vec<&Department> = all_depts
            .iter()
            .filter(|d| d.company_id == company.id && self.is_root_department(d))
            .collect();

        let units = self
            .units_by_company
            .get(&company.id)
            .map(|us| {
                us.iter()
                    .map(|u| UnitNode {
                        id: u.id,
                        name: u.name.clone(),
                        departments: roots
                            .iter()
                            .filter(|d| d.unit_id == Some(u.id))
                            .map(|d| self.department(d))
                            .collect(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let unit_ids: HashSet<u64> = self
            .units_by_company
            .get(&company.id)
            .map(|us| us.iter().map(|u| u.id).collect())
            .unwrap_or_default();

        CompanyNode {
            id: company.id,
            name: company.name.clone(),
            code: company.code.clone(),
            units,
            departments: roots
                .iter()
                .filter(|d| d.unit_id.is_none_or(|u| !unit_ids.contains(&u)))
                .map(|d| self.department(d))
                .collect(),
            children: self
                .company_children
                .get(&Some(company.id))
                .map(|cs| cs.iter().map(|c| self.company(c, all_depts)).collect())
                .unwrap_or_default(),
        }
    }
}

/// Builds the nested organization chart. Rows caught in a parent loop are not reachable
/// from any root and are left out.
pub fn build_org_tree(
    companies: &[Company],
    units: &[Unit],
    departments: &[Department],
    positions: &[Position],
) -> Vec<CompanyNode> {
    let company_ids: HashSet<u64> = companies.iter().map(|c| c.id).collect();
    let mut company_children = children_index(companies, |c| c.parent_id);
    // a parent that is not in the set makes the company a root
    let orphans: Vec<&Company> = companies
        .iter()
        .filter(|c| c.parent_id.is_some_and(|p| !company_ids.contains(&p)))
        .collect();
    company_children.entry(None).or_default().extend(orphans);

    let mut units_by_company: HashMap<u64, Vec<&Unit>> = HashMap::new();
    for u in units {
        units_by_company.entry(u.company_id).or_default().push(u);
    }
    let mut positions_by_dept: HashMap<u64, Vec<&Position>> = HashMap::new();
    for p in positions {
        positions_by_dept.entry(p.department_id).or_default().push(p);
    }

    let builder = Builder {
        company_children,
        units_by_company,
        dept_children: children_index(departments, |d| d.parent_id),
        positions_by_dept,
        dept_ids: departments.iter().map(|d| d.id).collect(),
    };

    builder
        .company_children
        .get(&None)
        .map(|roots| roots.iter().map(|c| builder.company(c, departments)).collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn company(id: u64, parent: Option<u64>) -> Company {
        Company {
            id,
            name: format!("Co {id}"),
            code: format!("C{id}"),
            parent_id: parent,
            is_active: true,
        }
    }

    fn dept(id: u64, company_id: u64, unit_id: Option<u64>, parent: Option<u64>) -> Department {
        Department {
            id,
            company_id,
            unit_id,
            parent_id: parent,
            name: format!("Dept {id}"),
            is_active: true,
        }
    }

    #[test]
    fn reparenting_under_descendant_is_a_cycle() {
        // 1 <- 2 <- 3
        let parents = HashMap::from([(1, None), (2, Some(1)), (3, Some(2))]);
        assert!(creates_cycle(1, 3, &parents));
        assert!(creates_cycle(2, 2, &parents));
        assert!(!creates_cycle(3, 1, &parents));
        assert!(!creates_cycle(2, 4, &parents));
    }

    #[test]
    fn existing_loop_is_reported_as_cycle() {
        let parents = HashMap::from([(5, Some(6)), (6, Some(5))]);
        assert!(creates_cycle(1, 5, &parents));
    }

    #[test]
    fn tree_nests_units_departments_and_positions() {
        let companies = [company(1, None), company(2, Some(1))];
        let units = [Unit { id: 10, company_id: 1, name: "North".into(), is_active: true }];
        let departments = [
            dept(100, 1, Some(10), None),
            dept(101, 1, None, None),
            dept(102, 1, Some(10), Some(100)),
            dept(200, 2, None, None),
        ];
        let positions = [Position { id: 1000, department_id: 102, title: "Analyst".into(), is_active: true }];

        let tree = build_org_tree(&companies, &units, &departments, &positions);
        assert_eq!(tree.len(), 1);
        let root = &tree[0];
        assert_eq!(root.units.len(), 1);
        assert_eq!(root.units[0].departments.len(), 1);
        assert_eq!(root.units[0].departments[0].children[0].id, 102);
        assert_eq!(root.units[0].departments[0].children[0].positions[0].title, "Analyst");
        assert_eq!(root.departments.len(), 1);
        assert_eq!(root.departments[0].id, 101);
        assert_eq!(root.children[0].id, 2);
        assert_eq!(root.children[0].departments[0].id, 200);
    }

    #[test]
    fn company_with_missing_parent_becomes_root() {
        let tree = build_org_tree(&[company(3, Some(42))], &[], &[], &[]);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].id, 3);
    }
}
