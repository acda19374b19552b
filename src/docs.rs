use crate::api::attendance::{AttendanceQuery, MarkAttendance};
use crate::api::benefit::{BenefitSummaryResponse, CreateBenefitType, SubmitClaim, UpsertBudget};
use crate::api::employee::{CreateEmployee, EmployeeListResponse, EmployeeQuery};
use crate::api::leave_request::{
    CreateLeave, CreateLeaveType, LeaveFilter, LeaveListResponse, LeaveSummaryResponse,
};
use crate::api::organization::{
    CreateCompany, CreateDepartment, CreatePosition, CreateUnit, CreateWorkingShift, Reparent,
};
use crate::api::user::{ChangeRole, LinkEmployee, SetActive, UserListResponse};
use crate::model::attendance::AttendanceStatus;
use crate::model::benefit::{BenefitClaim, BenefitType, ClaimStatus};
use crate::model::employee::{EmployeeStatus, EmployeeView};
use crate::model::leave::{LeaveRequestView, LeaveStatus, LeaveType};
use crate::model::organization::{Company, Department, Position, Unit};
use crate::model::role::Role;
use crate::model::user::UserSummary;
use crate::model::working_shift::WorkingShift;
use crate::models::{LoginReqDto, RegisterReq, TokenPair};
use crate::report::attendance_calendar::{DayEntry, EmployeeMonth};
use crate::report::benefit_summary::BenefitBalance;
use crate::report::dashboard::{Activity, ActivityKind, DashboardSummary, TrendPoint};
use crate::report::leave_summary::LeaveBalance;
use crate::report::org_tree::{CompanyNode, DepartmentNode, PositionNode, UnitNode};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "HR Portal API",
        version = "1.0.0",
        description = r#"
## HR Portal

Back end of an HR portal: employee records, the organization chart, attendance,
leave and benefit budgets, plus an HR dashboard.

### 🔹 Key Features
- **Employee Management**
  - Create, update, list, view and soft-delete employee profiles
- **Organization**
  - Companies, units, departments, positions and working shifts, with a nested chart
- **Attendance**
  - Daily check-in/check-out, HR corrections and a month-by-day attendance sheet
- **Leave**
  - Requests, approvals, leave types and yearly balances
- **Benefits**
  - Yearly budgets, claims checked against the remaining budget, approvals
- **Dashboard**
  - Today's headcount, presence and leave, a 7-day trend and recent activity

### 🔐 Security
Endpoints under `/api` require a **JWT Bearer** access token from `/auth/login`.
HR and Admin roles can act on other employees' records; users management is Admin only.

### 📦 Response Format
- JSON-based RESTful responses
- Errors: `{"success": false, "error": "..."}`, or `{"success": false, "errors": {field: message}}` for validation
"#,
    ),
    paths(
        crate::auth::handlers::register,
        crate::auth::handlers::login,
        crate::auth::handlers::refresh_token,
        crate::auth::handlers::logout,

        crate::api::employee::create_employee,
        crate::api::employee::get_employee,
        crate::api::employee::list_employees,
        crate::api::employee::update_employee,
        crate::api::employee::delete_employee,

        crate::api::organization::get_org_tree,
        crate::api::organization::list_companies,
        crate::api::organization::create_company,
        crate::api::organization::reparent_company,
        crate::api::organization::list_units,
        crate::api::organization::create_unit,
        crate::api::organization::list_departments,
        crate::api::organization::create_department,
        crate::api::organization::reparent_department,
        crate::api::organization::list_positions,
        crate::api::organization::create_position,
        crate::api::organization::list_shifts,
        crate::api::organization::create_shift,

        crate::api::attendance::check_in,
        crate::api::attendance::check_out,
        crate::api::attendance::mark_attendance,
        crate::api::attendance::get_attendance_data,

        crate::api::leave_request::leave_list,
        crate::api::leave_request::get_leave,
        crate::api::leave_request::create_leave,
        crate::api::leave_request::approve_leave,
        crate::api::leave_request::reject_leave,
        crate::api::leave_request::cancel_leave,
        crate::api::leave_request::my_leave_requests,
        crate::api::leave_request::leave_summary,
        crate::api::leave_request::list_leave_types,
        crate::api::leave_request::create_leave_type,

        crate::api::benefit::get_benefit_summary,
        crate::api::benefit::submit_benefit_claim,
        crate::api::benefit::list_claims,
        crate::api::benefit::cancel_claim,
        crate::api::benefit::approve_claim,
        crate::api::benefit::reject_claim,
        crate::api::benefit::upsert_budget,
        crate::api::benefit::list_benefit_types,
        crate::api::benefit::create_benefit_type,

        crate::api::dashboard::get_dashboard_summary,

        crate::api::user::list_users,
        crate::api::user::change_role,
        crate::api::user::link_employee,
        crate::api::user::set_active,
        crate::api::user::delete_user
    ),
    components(
        schemas(
            RegisterReq,
            LoginReqDto,
            TokenPair,
            Role,
            CreateEmployee,
            EmployeeQuery,
            EmployeeView,
            EmployeeStatus,
            EmployeeListResponse,
            Company,
            Unit,
            Department,
            Position,
            WorkingShift,
            CreateCompany,
            CreateUnit,
            CreateDepartment,
            CreatePosition,
            CreateWorkingShift,
            Reparent,
            CompanyNode,
            UnitNode,
            DepartmentNode,
            PositionNode,
            AttendanceQuery,
            AttendanceStatus,
            MarkAttendance,
            EmployeeMonth,
            DayEntry,
            CreateLeave,
            CreateLeaveType,
            LeaveFilter,
            LeaveListResponse,
            LeaveRequestView,
            LeaveStatus,
            LeaveType,
            LeaveBalance,
            LeaveSummaryResponse,
            BenefitType,
            BenefitClaim,
            ClaimStatus,
            BenefitBalance,
            BenefitSummaryResponse,
            SubmitClaim,
            UpsertBudget,
            CreateBenefitType,
            DashboardSummary,
            TrendPoint,
            Activity,
            ActivityKind,
            UserSummary,
            UserListResponse,
            ChangeRole,
            LinkEmployee,
            SetActive
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Auth", description = "Registration, login and token rotation"),
        (name = "Employee", description = "Employee management APIs"),
        (name = "Organization", description = "Companies, units, departments, positions and shifts"),
        (name = "Attendance", description = "Attendance management APIs"),
        (name = "Leave", description = "Leave management APIs"),
        (name = "Benefit", description = "Benefit budgets and claims"),
        (name = "Dashboard", description = "HR overview"),
        (name = "Users", description = "Login account administration"),
    )
)]
pub struct ApiDoc;

/// Registers the `bearer_auth` scheme the handlers' `security(...)` entries refer to.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_lists_bearer_scheme_and_core_paths() {
        let doc = ApiDoc::openapi();
        let components = doc.components.expect("components");
        assert!(components.security_schemes.contains_key("bearer_auth"));
        assert!(doc.paths.paths.contains_key("/api/attendance/monthly"));
        assert!(doc.paths.paths.contains_key("/api/benefit/claims"));
        assert!(doc.paths.paths.contains_key("/api/dashboard"));
    }
}
